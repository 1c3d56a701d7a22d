//! 流水线配置 - 通过JSON文件调整参数
//! Pipeline configuration, loaded from JSON and validated once at startup.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// 默认类别名 (COCO前若干类)
const DEFAULT_CLASS_NAMES: [&str; 8] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
];

/// 完整流水线配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    /// 采集 → 推理 队列容量 (>= 1, 满时丢弃最旧帧)
    pub queue_capacity: usize,
    pub inference: InferenceConfig,
    pub smoothing: SmoothingConfig,
    pub adaptive: AdaptiveConfig,
    pub render: RenderConfig,
    /// 类别名表, 下标为 class id
    pub class_names: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    /// 单次取帧截止时间 (毫秒), 保证停止信号及时被观察到
    pub frame_deadline_ms: u64,
    /// 瞬时错误首次退避 (毫秒), 之后翻倍
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// 推理输入尺寸档位, 从高到低
    pub resolution_tiers: Vec<u32>,
    /// 起始档位下标
    pub initial_resolution_tier: usize,
    pub initial_stride: u32,
    pub min_stride: u32,
    pub max_stride: u32,
    /// 推理阶段置信度阈值 (低于此值的检测在平滑前丢弃)
    pub confidence_threshold: f32,
    /// 自适应可提高到的最大阈值
    pub max_confidence_threshold: f32,
    /// 队列等待上限 (毫秒)
    pub queue_wait_ms: u64,
    /// 连续失败多少次视为检测器损坏
    pub max_consecutive_failures: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// 指数平滑系数 α (0 <= α < 1, 越大越稳定)
    pub alpha: f32,
    /// 连续未匹配超过此帧数的轨迹被移除
    pub eviction_age: u32,
    /// 最大匹配距离 (像素, 中心点欧氏距离)
    pub max_match_distance: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub target_fps: f32,
    /// 评估周期 (毫秒)
    pub interval_ms: u64,
    /// 连续多少个窗口越界才调整
    pub windows: u32,
    /// 低于 target - tolerance 视为过慢 (FPS); None 时取目标的20%
    pub slow_tolerance_fps: Option<f32>,
    /// 高于 target + tolerance 视为富余 (FPS); None 时取目标的30%
    pub fast_tolerance_fps: Option<f32>,
    /// 置信度阈值调整步长, 0 表示不调整阈值
    pub confidence_step: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub overlay_fps: f32,
    /// 显示阈值, 可与推理阈值不同
    pub display_confidence: f32,
    /// 面积小于此值的框不绘制标签
    pub min_label_area: f32,
    pub box_thickness: u32,
    pub label_scale: f32,
    pub show_fps: bool,
    /// 按轨迹ID着色 (否则统一绿色)
    pub color_by_track: bool,
    /// 叠加到最新采集帧上 (否则输出透明叠加层)
    pub composite: bool,
    /// 标签字体 (TTF/OTF), 未设置时只画框
    pub font_path: Option<String>,
    /// 每N次渲染保存一张PNG
    pub save_every: u32,
    /// 状态日志周期 (毫秒)
    pub status_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            queue_capacity: 3,
            inference: InferenceConfig::default(),
            smoothing: SmoothingConfig::default(),
            adaptive: AdaptiveConfig::default(),
            render: RenderConfig::default(),
            class_names: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            frame_deadline_ms: 200,
            retry_backoff_ms: 50,
            max_retry_backoff_ms: 1000,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            resolution_tiers: vec![416, 320],
            initial_resolution_tier: 0,
            initial_stride: 2,
            min_stride: 1,
            max_stride: 4,
            confidence_threshold: 0.35,
            max_confidence_threshold: 0.5,
            queue_wait_ms: 100,
            max_consecutive_failures: 10,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            eviction_age: 5,
            max_match_distance: 50.0,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_fps: 30.0,
            interval_ms: 1000,
            windows: 2,
            slow_tolerance_fps: None,
            fast_tolerance_fps: None,
            confidence_step: 0.05,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            overlay_fps: 15.0,
            display_confidence: 0.5,
            min_label_area: 2000.0,
            box_thickness: 2,
            label_scale: 16.0,
            show_fps: true,
            color_by_track: false,
            composite: false,
            font_path: None,
            save_every: 0,
            status_interval_ms: 1000,
        }
    }
}

impl CameraConfig {
    pub fn frame_deadline(&self) -> Duration {
        Duration::from_millis(self.frame_deadline_ms)
    }
}

impl InferenceConfig {
    pub fn queue_wait(&self) -> Duration {
        Duration::from_millis(self.queue_wait_ms)
    }
}

impl AdaptiveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn slow_tolerance(&self) -> f32 {
        self.slow_tolerance_fps.unwrap_or(self.target_fps * 0.2)
    }

    pub fn fast_tolerance(&self) -> f32 {
        self.fast_tolerance_fps.unwrap_or(self.target_fps * 0.3)
    }
}

impl RenderConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// 各类等待/周期参数的上限 (毫秒)
pub const MAX_PERIOD_MS: u64 = 60_000;

/// 类别名查表, 超出范围时为 "object"
pub fn class_name(class_names: &[String], class_id: u32) -> &str {
    class_names
        .get(class_id as usize)
        .map(String::as_str)
        .unwrap_or("object")
}

impl PipelineConfig {
    /// 从JSON文件加载配置; 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("📝 配置文件 {} 不存在, 创建默认配置", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 校验所有边界, 启动前调用一次
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.into()))
        }
        fn unit(value: f32) -> bool {
            (0.0..=1.0).contains(&value)
        }

        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return invalid("camera width/height must be positive");
        }
        if !(cam.fps > 0.0) {
            return invalid("camera fps must be positive");
        }
        if cam.frame_deadline_ms == 0 {
            return invalid("camera frame_deadline_ms must be positive");
        }
        if cam.retry_backoff_ms > cam.max_retry_backoff_ms {
            return invalid("camera retry_backoff_ms above max_retry_backoff_ms");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        let periods = [
            ("camera.frame_deadline_ms", cam.frame_deadline_ms),
            ("camera.max_retry_backoff_ms", cam.max_retry_backoff_ms),
            ("inference.queue_wait_ms", self.inference.queue_wait_ms),
            ("adaptive.interval_ms", self.adaptive.interval_ms),
            ("render.status_interval_ms", self.render.status_interval_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, ms)| *ms > MAX_PERIOD_MS) {
            return invalid(format!("{name} must not exceed {MAX_PERIOD_MS}ms"));
        }

        let inf = &self.inference;
        if inf.resolution_tiers.is_empty() {
            return invalid("inference.resolution_tiers must not be empty");
        }
        if inf.resolution_tiers.iter().any(|&t| t == 0) {
            return invalid("inference.resolution_tiers must be positive");
        }
        if inf.resolution_tiers.windows(2).any(|w| w[0] <= w[1]) {
            return invalid("inference.resolution_tiers must be strictly descending");
        }
        if inf.initial_resolution_tier >= inf.resolution_tiers.len() {
            return invalid("inference.initial_resolution_tier out of range");
        }
        if inf.min_stride == 0 || inf.min_stride > inf.max_stride {
            return invalid("inference stride bounds must satisfy 1 <= min <= max");
        }
        if !(inf.min_stride..=inf.max_stride).contains(&inf.initial_stride) {
            return invalid("inference.initial_stride outside [min_stride, max_stride]");
        }
        if !unit(inf.confidence_threshold) || !unit(inf.max_confidence_threshold) {
            return invalid("inference confidence thresholds must be within [0, 1]");
        }
        if inf.max_confidence_threshold < inf.confidence_threshold {
            return invalid("inference.max_confidence_threshold below confidence_threshold");
        }
        if inf.queue_wait_ms == 0 {
            return invalid("inference.queue_wait_ms must be positive");
        }
        if inf.max_consecutive_failures == 0 {
            return invalid("inference.max_consecutive_failures must be at least 1");
        }

        let sm = &self.smoothing;
        if !(0.0..1.0).contains(&sm.alpha) {
            return invalid("smoothing.alpha must satisfy 0 <= alpha < 1");
        }
        if !(sm.max_match_distance >= 0.0) {
            return invalid("smoothing.max_match_distance must be non-negative");
        }

        let ad = &self.adaptive;
        if !(ad.target_fps > 0.0) {
            return invalid("adaptive.target_fps must be positive");
        }
        if ad.interval_ms == 0 || ad.windows == 0 {
            return invalid("adaptive.interval_ms and adaptive.windows must be positive");
        }
        if ad.slow_tolerance() < 0.0 || ad.fast_tolerance() < 0.0 {
            return invalid("adaptive tolerances must be non-negative");
        }
        if !(ad.confidence_step >= 0.0) {
            return invalid("adaptive.confidence_step must be non-negative");
        }

        let r = &self.render;
        if !(r.overlay_fps > 0.0) {
            return invalid("render.overlay_fps must be positive");
        }
        if !unit(r.display_confidence) {
            return invalid("render.display_confidence must be within [0, 1]");
        }
        if r.status_interval_ms == 0 {
            return invalid("render.status_interval_ms must be positive");
        }
        if r.overlay_fps > ad.target_fps {
            warn!(
                "⚠️  overlay_fps {:.1} 高于 target_fps {:.1}",
                r.overlay_fps, ad.target_fps
            );
        }
        Ok(())
    }
}
