//! 流水线共享状态 (PipelineState)
//! Explicit, passed-in context: tunables, latest detection snapshot and counters.
//!
//! - 可调参数整体由一把锁保护, 读者只会拿到完整的一组值
//! - 检测快照以 `Arc` 整体替换, 渲染线程永远看不到半更新的集合

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::stats::PipelineCounters;
use crate::config::PipelineConfig;
use crate::detection::types::DetectionSnapshot;
use crate::error::PipelineError;
use crate::input::Frame;

/// 运行时可调参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tunables {
    /// 跳帧间隔 (每 stride 帧推理一次)
    pub stride: u32,
    /// 当前分辨率档位下标
    pub resolution_tier: usize,
    /// 当前推理输入尺寸
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub target_fps: f32,
    pub overlay_fps: f32,
}

impl Tunables {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let inf = &config.inference;
        let tier = inf
            .initial_resolution_tier
            .min(inf.resolution_tiers.len().saturating_sub(1));
        Self {
            stride: inf.initial_stride,
            resolution_tier: tier,
            input_size: inf.resolution_tiers.get(tier).copied().unwrap_or(0),
            confidence_threshold: inf.confidence_threshold,
            target_fps: config.adaptive.target_fps,
            overlay_fps: config.render.overlay_fps,
        }
    }
}

pub struct PipelineState {
    tunables: Mutex<Tunables>,
    snapshot: RwLock<Arc<DetectionSnapshot>>,
    latest_frame: Mutex<Option<Frame>>,
    pub counters: PipelineCounters,
}

impl PipelineState {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tunables: Mutex::new(Tunables::from_config(config)),
            snapshot: RwLock::new(Arc::new(DetectionSnapshot::default())),
            latest_frame: Mutex::new(None),
            counters: PipelineCounters::default(),
        }
    }

    /// 读取当前参数 (整组拷贝)
    pub fn tunables(&self) -> Tunables {
        *self.tunables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在锁内原子修改参数
    pub fn update_tunables<R>(&self, f: impl FnOnce(&mut Tunables) -> R) -> R {
        let mut guard = self.tunables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// 当前检测快照
    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 发布新快照; 快照按帧序号全序
    pub fn publish_snapshot(&self, snapshot: DetectionSnapshot) -> Result<(), PipelineError> {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.sequence <= guard.sequence {
            return Err(PipelineError::Invariant(format!(
                "snapshot #{} published after #{}",
                snapshot.sequence, guard.sequence
            )));
        }
        *guard = Arc::new(snapshot);
        drop(guard);
        self.counters.record_snapshot();
        Ok(())
    }

    /// 记录最新采集帧 (用于叠加合成)
    pub fn publish_frame(&self, frame: &Frame) {
        *self
            .latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_tunables_from_config() {
        let config = PipelineConfig::default();
        let state = PipelineState::new(&config);
        let t = state.tunables();
        assert_eq!(t.stride, 2);
        assert_eq!(t.input_size, 416);
        assert!((t.confidence_threshold - 0.35).abs() < 1e-6);
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn test_update_is_visible_as_a_whole() {
        let state = PipelineState::new(&PipelineConfig::default());
        state.update_tunables(|t| {
            t.stride = 3;
            t.resolution_tier = 1;
            t.input_size = 320;
        });
        let t = state.tunables();
        assert_eq!((t.stride, t.resolution_tier, t.input_size), (3, 1, 320));
    }

    #[test]
    fn test_snapshot_sequence_must_increase() {
        let state = PipelineState::new(&PipelineConfig::default());
        let snap = |sequence| DetectionSnapshot {
            sequence,
            ..Default::default()
        };
        state.publish_snapshot(snap(4)).unwrap();
        assert!(state.publish_snapshot(snap(4)).is_err());
        assert!(state.publish_snapshot(snap(2)).is_err());
        state.publish_snapshot(snap(6)).unwrap();
        assert_eq!(state.snapshot().sequence, 6);
        assert_eq!(state.counters.snapshot().snapshots, 2);
    }

    #[test]
    fn test_readers_keep_old_snapshot_alive() {
        let state = PipelineState::new(&PipelineConfig::default());
        state
            .publish_snapshot(DetectionSnapshot {
                sequence: 1,
                ..Default::default()
            })
            .unwrap();
        let held = state.snapshot();
        state
            .publish_snapshot(DetectionSnapshot {
                sequence: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(held.sequence, 1);
        assert_eq!(state.snapshot().sequence, 2);
    }
}
