//! 检测器接口 (Detector)
//! 职责: 单帧 → 原始检测列表 (源图像坐标, 已完成NMS)

use crate::error::DetectorError;
use crate::input::Frame;

use super::types::RawDetection;

/// 单次推理请求参数 (每帧开始时从可调参数读取)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectRequest {
    /// 推理输入尺寸 (正方形边长)
    pub input_size: u32,
    /// 检测器可据此提前丢弃低分结果; 阶段本身仍会再过滤一次
    pub confidence_threshold: f32,
}

/// 检测器统一接口
///
/// 实现者负责预处理 (缩放) 与后处理 (坐标映射回源图像)。
/// 返回的检测框必须坐标有限, 宽高非负, 置信度在 [0, 1]。
pub trait Detector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        request: &DetectRequest,
    ) -> Result<Vec<RawDetection>, DetectorError>;

    fn name(&self) -> &str;
}

impl<T: Detector + ?Sized> Detector for Box<T> {
    fn detect(
        &mut self,
        frame: &Frame,
        request: &DetectRequest,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        (**self).detect(frame, request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
