//! 数据关联 (检测 ↔ 轨迹)
//! Data association between a new detection set and the live tracks.
//!
//! 贪心匹配而非匈牙利算法: 延迟低, 目标稀疏时效果足够。
//! 通过 `Associator` 接口可替换为更强的匹配器, 平滑器其余部分不受影响。

use super::types::{RawDetection, TrackedDetection};

/// 关联器接口
///
/// `detections` 已按访问顺序排列 (置信度降序)。
/// 返回值与 `detections` 等长, 第 i 项为匹配到的轨迹下标;
/// 同一轨迹最多匹配一个检测, 且只匹配相同类别。
pub trait Associator: Send {
    fn associate(
        &self,
        tracks: &[TrackedDetection],
        detections: &[RawDetection],
        max_distance: f32,
    ) -> Vec<Option<usize>>;

    fn name(&self) -> &'static str;
}

/// 贪心最近邻 (中心点欧氏距离, 含距离门限)
///
/// 距离相同时取轨迹ID最小者
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyNearestAssociator;

impl Associator for GreedyNearestAssociator {
    fn associate(
        &self,
        tracks: &[TrackedDetection],
        detections: &[RawDetection],
        max_distance: f32,
    ) -> Vec<Option<usize>> {
        let mut taken = vec![false; tracks.len()];
        detections
            .iter()
            .map(|det| {
                let mut best: Option<(usize, f32)> = None;
                for (i, track) in tracks.iter().enumerate() {
                    if taken[i] || track.class_id != det.class_id {
                        continue;
                    }
                    let dist = track.bbox.center_distance(&det.bbox);
                    if dist > max_distance {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((j, best_dist)) => {
                            dist < best_dist
                                || (dist == best_dist && track.track_id < tracks[j].track_id)
                        }
                    };
                    if better {
                        best = Some((i, dist));
                    }
                }
                let chosen = best.map(|(i, _)| i);
                if let Some(i) = chosen {
                    taken[i] = true;
                }
                chosen
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "greedy-nearest"
    }
}

/// 贪心最大IOU (不使用距离门限, 以 `min_iou` 为门限)
#[derive(Clone, Copy, Debug)]
pub struct GreedyIouAssociator {
    pub min_iou: f32,
}

impl Default for GreedyIouAssociator {
    fn default() -> Self {
        Self { min_iou: 0.3 }
    }
}

impl Associator for GreedyIouAssociator {
    fn associate(
        &self,
        tracks: &[TrackedDetection],
        detections: &[RawDetection],
        _max_distance: f32,
    ) -> Vec<Option<usize>> {
        let mut taken = vec![false; tracks.len()];
        detections
            .iter()
            .map(|det| {
                let mut best: Option<(usize, f32)> = None;
                for (i, track) in tracks.iter().enumerate() {
                    if taken[i] || track.class_id != det.class_id {
                        continue;
                    }
                    let iou = track.bbox.iou(&det.bbox);
                    if iou < self.min_iou {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((j, best_iou)) => {
                            iou > best_iou
                                || (iou == best_iou && track.track_id < tracks[j].track_id)
                        }
                    };
                    if better {
                        best = Some((i, iou));
                    }
                }
                let chosen = best.map(|(i, _)| i);
                if let Some(i) = chosen {
                    taken[i] = true;
                }
                chosen
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "greedy-iou"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    fn track(id: u64, class_id: u32, x: f32) -> TrackedDetection {
        let det = RawDetection::new(BBox::new(x, 0.0, 10.0, 10.0), class_id, 0.9);
        TrackedDetection::spawn(id, &det, 1)
    }

    fn det(class_id: u32, x: f32) -> RawDetection {
        RawDetection::new(BBox::new(x, 0.0, 10.0, 10.0), class_id, 0.9)
    }

    #[test]
    fn test_nearest_same_class_only() {
        let tracks = vec![track(1, 0, 0.0), track(2, 1, 5.0)];
        let out = GreedyNearestAssociator.associate(&tracks, &[det(1, 4.0)], 50.0);
        assert_eq!(out, vec![Some(1)]);
    }

    #[test]
    fn test_gate_is_inclusive() {
        let tracks = vec![track(1, 0, 0.0)];
        let at_gate = GreedyNearestAssociator.associate(&tracks, &[det(0, 50.0)], 50.0);
        assert_eq!(at_gate, vec![Some(0)]);
        let beyond = GreedyNearestAssociator.associate(&tracks, &[det(0, 50.5)], 50.0);
        assert_eq!(beyond, vec![None]);
    }

    #[test]
    fn test_equal_distance_prefers_lowest_id() {
        let tracks = vec![track(7, 0, 10.0), track(3, 0, -10.0)];
        let out = GreedyNearestAssociator.associate(&tracks, &[det(0, 0.0)], 50.0);
        assert_eq!(out, vec![Some(1)]);
    }

    #[test]
    fn test_track_matched_at_most_once() {
        let tracks = vec![track(1, 0, 0.0)];
        let out = GreedyNearestAssociator.associate(&tracks, &[det(0, 1.0), det(0, 0.0)], 50.0);
        assert_eq!(out, vec![Some(0), None]);
    }

    #[test]
    fn test_iou_associator() {
        let tracks = vec![track(1, 0, 0.0), track(2, 0, 100.0)];
        let assoc = GreedyIouAssociator::default();
        let out = assoc.associate(&tracks, &[det(0, 98.0), det(0, 50.0)], 0.0);
        assert_eq!(out, vec![Some(1), None]);
    }
}
