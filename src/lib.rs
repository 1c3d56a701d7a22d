// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 实时目标检测流水线
//!
//! 采集 → 丢弃最旧帧队列 → 跳帧推理 → 时域平滑 → 快照 → 固定节拍叠加渲染,
//! 自适应控制器在目标帧率附近调节 stride / 输入分辨率 / 置信度阈值。
pub mod config; // 流水线配置参数
pub mod detection; // 推理与时域平滑
pub mod error; // 错误类型
pub mod input; // 帧源与采集
pub mod pipeline; // 线程编排与共享状态
pub mod render; // 叠加层渲染与输出

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    BBox, ColorKeyDetector, Detector, GreedyIouAssociator, GreedyNearestAssociator,
    RawDetection, TrackedDetection,
};
pub use crate::error::{PipelineError, SourceError};
pub use crate::input::{FrameSource, SyntheticCamera, SyntheticConfig};
pub use crate::pipeline::{Pipeline, PipelineReport, PipelineState};
pub use crate::render::{FrameSink, NullSink, PngSequenceSink};

/// 本地时间字符串, 各字段以 `delimiter` 分隔 (用于输出文件名)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%3f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_string_fields() {
        let s = gen_time_string("-");
        let parts: Vec<&str> = s.split('-').collect();
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[6].len(), 3);
    }
}
