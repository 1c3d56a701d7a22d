//! 渲染模块 - 叠加层绘制与输出
//!
//! - overlay: 检测框/标签/FPS 角标绘制
//! - sink: 输出端 (PNG 序列, 通道, 空输出)
//! - stage: 固定节拍渲染
//! - palette: 轨迹配色

pub mod overlay;
pub mod palette;
pub mod sink;
pub mod stage;

pub use overlay::OverlayRenderer;
pub use sink::{AnnotatedFrame, ChannelSink, FrameSink, NullSink, PngSequenceSink};
pub use stage::RenderStage;
