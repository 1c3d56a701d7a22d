//! 输入模块 - 帧源, 帧队列与采集线程
//!
//! 包含:
//! - source: 帧源接口与帧结构
//! - queue: 丢弃最旧帧的有界队列
//! - capture: 采集线程
//! - camera: 合成摄像头

pub mod camera;
pub mod capture;
pub mod queue;
pub mod source;

pub use camera::{SyntheticCamera, SyntheticConfig};
pub use capture::CaptureStage;
pub use queue::{frame_queue, FrameConsumer, FrameProducer};
pub use source::{Frame, FrameSource, SourceImage, SourceInfo};
