//! 帧源接口 (FrameSource) 与帧数据结构
//! Frame source contract and the frame type handed between stages

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::error::SourceError;

/// 摄像头打开后的描述信息
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f32,
}

/// 帧源返回的原始图像 (尚未分配序号)
#[derive(Debug)]
pub struct SourceImage {
    pub image: RgbImage,
    pub timestamp: Instant,
}

impl SourceImage {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }
}

/// 已采集帧 (采集线程 → 推理线程)
///
/// 序号由采集阶段分配, 单调递增, 从1开始
#[derive(Clone)]
pub struct Frame {
    pub sequence: u64,
    pub timestamp: Instant,
    pub image: Arc<RgbImage>, // 使用Arc共享数据,避免复制
}

impl Frame {
    pub fn new(sequence: u64, source: SourceImage) -> Self {
        Self {
            sequence,
            timestamp: source.timestamp,
            image: Arc::new(source.image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("size", &format_args!("{}x{}", self.width(), self.height()))
            .finish()
    }
}

/// 摄像头抽象
///
/// `next_frame` 必须在 `deadline` 前返回 (`SourceError::Timeout`),
/// 采集线程依赖它观察停止信号
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<SourceInfo, SourceError>;

    fn next_frame(&mut self, deadline: Instant) -> Result<SourceImage, SourceError>;

    fn close(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<SourceInfo, SourceError> {
        (**self).open()
    }

    fn next_frame(&mut self, deadline: Instant) -> Result<SourceImage, SourceError> {
        (**self).next_frame(deadline)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
