//! 错误类型定义
//! Error types for every failure class of the pipeline
//!
//! - 采集: 瞬时错误重试, 设备丢失致命
//! - 推理: 单帧失败跳过, 连续失败超过阈值致命
//! - 不变量破坏: 程序缺陷, 立即中止

use std::path::PathBuf;

use thiserror::Error;

/// 摄像头读取错误 (FrameSource → CaptureStage)
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// 截止时间内没有新帧 (不是错误, 用于观察停止信号)
    #[error("no frame before deadline")]
    Timeout,
    /// 瞬时读取失败, 退避后重试
    #[error("transient read failure: {0}")]
    Transient(String),
    /// 设备永久丢失
    #[error("device lost: {0}")]
    DeviceLost(String),
}

/// 单次推理失败
#[derive(Debug, Clone, Error)]
#[error("detector failed on frame #{sequence}: {reason}")]
pub struct DetectorError {
    pub sequence: u64,
    pub reason: String,
}

impl DetectorError {
    pub fn new(sequence: u64, reason: impl Into<String>) -> Self {
        Self {
            sequence,
            reason: reason.into(),
        }
    }
}

/// 配置加载/校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize config for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 输出端错误
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 流水线致命错误 (返回给调用方)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera lost: {0}")]
    DeviceLost(String),
    #[error("camera failed to open: {0}")]
    SourceOpen(String),
    #[error("detector broken after {failures} consecutive failures (last: {last})")]
    DetectorBroken { failures: u32, last: DetectorError },
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("{0} stage crashed")]
    StageCrashed(&'static str),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
