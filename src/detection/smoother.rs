//! 时域平滑器 (TemporalSmoother)
//!
//! 每个检测集: 关联 → 匹配轨迹指数平滑 → 未匹配轨迹老化/淘汰 → 新建轨迹 → 输出快照

use tracing::debug;

use super::association::{Associator, GreedyNearestAssociator};
use super::types::{DetectionSnapshot, RawDetection, RawDetectionSet, TrackedDetection};
use crate::config::SmoothingConfig;
use crate::error::PipelineError;

pub struct TemporalSmoother<A: Associator = GreedyNearestAssociator> {
    config: SmoothingConfig,
    associator: A,
    tracks: Vec<TrackedDetection>,
    next_id: u64,
    last_sequence: Option<u64>,
}

impl TemporalSmoother<GreedyNearestAssociator> {
    pub fn new(config: SmoothingConfig) -> Self {
        Self::with_associator(config, GreedyNearestAssociator)
    }
}

impl<A: Associator> TemporalSmoother<A> {
    pub fn with_associator(config: SmoothingConfig, associator: A) -> Self {
        Self {
            config,
            associator,
            tracks: Vec::new(),
            next_id: 1,
            last_sequence: None,
        }
    }

    pub fn associator_name(&self) -> &'static str {
        self.associator.name()
    }

    pub fn tracks(&self) -> &[TrackedDetection] {
        &self.tracks
    }

    /// 融合一个检测集, 返回更新后的完整快照
    ///
    /// 检测集序号必须严格递增
    pub fn update(&mut self, set: &RawDetectionSet) -> Result<DetectionSnapshot, PipelineError> {
        if let Some(last) = self.last_sequence {
            if set.sequence <= last {
                return Err(PipelineError::Invariant(format!(
                    "detection set #{} arrived after #{}",
                    set.sequence, last
                )));
            }
        }
        for det in &set.detections {
            det.validate().map_err(|reason| {
                PipelineError::Invariant(format!("frame #{}: {}", set.sequence, reason))
            })?;
        }
        self.last_sequence = Some(set.sequence);

        // 置信度降序访问 (稳定排序, 同分保持检测器输出顺序)
        let mut ordered: Vec<&RawDetection> = set.detections.iter().collect();
        ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let ordered: Vec<RawDetection> = ordered.into_iter().cloned().collect();

        let assignment =
            self.associator
                .associate(&self.tracks, &ordered, self.config.max_match_distance);

        let mut matched = vec![false; self.tracks.len()];
        let mut spawned = Vec::new();
        for (det, slot) in ordered.iter().zip(assignment) {
            match slot {
                Some(i) if i < self.tracks.len() && !matched[i] => {
                    matched[i] = true;
                    self.tracks[i].absorb(det, self.config.alpha, set.sequence);
                }
                Some(i) => {
                    return Err(PipelineError::Invariant(format!(
                        "associator {} returned invalid track slot {}",
                        self.associator.name(),
                        i
                    )));
                }
                None => spawned.push(det),
            }
        }

        // 未匹配轨迹老化, 超过淘汰阈值移除
        let eviction_age = self.config.eviction_age;
        let mut evicted = 0usize;
        let mut index = 0;
        self.tracks.retain_mut(|track| {
            let was_matched = matched[index];
            index += 1;
            if !was_matched {
                track.age = track.age.saturating_add(1);
            }
            let keep = track.age <= eviction_age;
            if !keep {
                evicted += 1;
            }
            keep
        });

        for det in spawned {
            let track = TrackedDetection::spawn(self.next_id, det, set.sequence);
            self.next_id += 1;
            self.tracks.push(track);
        }

        if evicted > 0 {
            debug!("🧹 帧 #{} 移除 {} 条过期轨迹", set.sequence, evicted);
        }

        Ok(DetectionSnapshot {
            sequence: set.sequence,
            timestamp: Some(set.timestamp),
            tracks: self.tracks.clone(),
        })
    }
}
