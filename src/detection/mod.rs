/// 检测系统 (Detection System)
///
/// 推理线程及其组件
/// - Detector:         检测器接口 + 颜色键参考实现
/// - InferenceStage:   跳帧, 阈值过滤, 失败升级
/// - TemporalSmoother: 关联 + 指数平滑 + 轨迹淘汰
pub mod association;
pub mod color_key;
pub mod detector;
pub mod inference;
pub mod smoother;
pub mod types;

pub use association::{Associator, GreedyIouAssociator, GreedyNearestAssociator};
pub use color_key::ColorKeyDetector;
pub use detector::{DetectRequest, Detector};
pub use inference::{FrameOutcome, InferenceStage};
pub use smoother::TemporalSmoother;
pub use types::{BBox, DetectionSnapshot, RawDetection, RawDetectionSet, TrackedDetection};
