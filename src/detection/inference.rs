//! 推理线程 (InferenceStage)
//! 职责: 出队帧 → 跳帧判断 → 检测 → 阈值过滤 → 时域平滑 → 发布快照
//!
//! 每帧开始时读取一次可调参数 (stride / 输入尺寸 / 阈值), 帧内不再变化。

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use super::association::{Associator, GreedyNearestAssociator};
use super::detector::{DetectRequest, Detector};
use super::smoother::TemporalSmoother;
use super::types::RawDetectionSet;
use crate::config::InferenceConfig;
use crate::error::PipelineError;
use crate::input::{Frame, FrameConsumer};
use crate::pipeline::{PipelineState, Shutdown};

/// 单帧处理结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 已推理, 附带通过阈值的检测数
    Inferred(usize),
    /// 按跳帧间隔丢弃
    Skipped,
    /// 检测器失败, 帧被丢弃
    Failed,
}

pub struct InferenceStage<'a, D: Detector + ?Sized, A: Associator = GreedyNearestAssociator> {
    detector: &'a mut D,
    smoother: TemporalSmoother<A>,
    state: Arc<PipelineState>,
    config: InferenceConfig,
    /// 跳帧计数器 (每出队一帧加一)
    frame_counter: u64,
    last_sequence: Option<u64>,
    consecutive_failures: u32,
}

impl<'a, D: Detector + ?Sized, A: Associator> InferenceStage<'a, D, A> {
    pub fn new(
        detector: &'a mut D,
        smoother: TemporalSmoother<A>,
        state: Arc<PipelineState>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            detector,
            smoother,
            state,
            config,
            frame_counter: 0,
            last_sequence: None,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// 推理主循环; 队列断开 (采集结束) 或停止信号时返回
    pub fn run(
        mut self,
        consumer: FrameConsumer,
        shutdown: &Shutdown,
    ) -> Result<(), PipelineError> {
        info!(
            "✅ 推理线程启动 (检测器: {}, 关联: {})",
            self.detector.name(),
            self.smoother.associator_name()
        );
        let wait = self.config.queue_wait();

        while !shutdown.is_triggered() {
            match consumer.pop_timeout(wait) {
                Ok(frame) => {
                    self.process(frame)?;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("帧队列已断开");
                    break;
                }
            }
        }

        info!("✅ 推理线程退出");
        Ok(())
    }

    /// 处理一帧
    pub fn process(&mut self, frame: Frame) -> Result<FrameOutcome, PipelineError> {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                return Err(PipelineError::Invariant(format!(
                    "frame #{} dequeued after #{}",
                    frame.sequence, last
                )));
            }
        }
        self.last_sequence = Some(frame.sequence);
        self.state.counters.record_retired();

        let tunables = self.state.tunables();
        self.frame_counter += 1;
        if self.frame_counter % u64::from(tunables.stride.max(1)) != 0 {
            self.state.counters.record_skip();
            return Ok(FrameOutcome::Skipped);
        }

        let request = DetectRequest {
            input_size: tunables.input_size,
            confidence_threshold: tunables.confidence_threshold,
        };

        let start = Instant::now();
        let detections = match self.detector.detect(&frame, &request) {
            Ok(detections) => detections,
            Err(err) => {
                self.consecutive_failures += 1;
                self.state.counters.record_detector_failure();
                warn!(
                    "⚠️  推理失败 ({}/{}): {}",
                    self.consecutive_failures, self.config.max_consecutive_failures, err
                );
                if self.consecutive_failures > self.config.max_consecutive_failures {
                    return Err(PipelineError::DetectorBroken {
                        failures: self.consecutive_failures,
                        last: err,
                    });
                }
                return Ok(FrameOutcome::Failed);
            }
        };
        let latency = start.elapsed();
        self.consecutive_failures = 0;
        self.state.counters.record_inference(latency);

        for det in &detections {
            det.validate().map_err(|reason| {
                PipelineError::Invariant(format!(
                    "detector {} on frame #{}: {}",
                    self.detector.name(),
                    frame.sequence,
                    reason
                ))
            })?;
        }

        let total = detections.len();
        let kept: Vec<_> = detections
            .into_iter()
            .filter(|d| d.confidence >= tunables.confidence_threshold)
            .collect();
        self.state.counters.record_filtered((total - kept.len()) as u64);
        let count = kept.len();

        let set = RawDetectionSet {
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            detections: kept,
        };
        let snapshot = self.smoother.update(&set)?;
        metrics::gauge!("picam_live_tracks").set(snapshot.len() as f64);
        self.state.publish_snapshot(snapshot)?;

        debug!(
            "🔍 帧 #{} @{}: {} 个检测, 耗时 {:.1}ms",
            frame.sequence,
            tunables.input_size,
            count,
            latency.as_secs_f64() * 1000.0
        );
        Ok(FrameOutcome::Inferred(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::detection::types::{BBox, RawDetection};
    use crate::error::DetectorError;
    use crate::input::SourceImage;
    use image::RgbImage;
    use std::collections::VecDeque;

    /// 返回固定检测结果, 可注入失败
    struct FixedDetector {
        detections: Vec<RawDetection>,
        fail: bool,
        /// 逐次调用的失败脚本, 用完后按 `fail`
        script: VecDeque<bool>,
        calls: Vec<(u64, DetectRequest)>,
    }

    impl FixedDetector {
        fn new(detections: Vec<RawDetection>) -> Self {
            Self {
                detections,
                fail: false,
                script: VecDeque::new(),
                calls: Vec::new(),
            }
        }
    }

    impl Detector for FixedDetector {
        fn detect(
            &mut self,
            frame: &Frame,
            request: &DetectRequest,
        ) -> Result<Vec<RawDetection>, DetectorError> {
            self.calls.push((frame.sequence, *request));
            let fail = self.script.pop_front().unwrap_or(self.fail);
            if fail {
                return Err(DetectorError::new(frame.sequence, "injected"));
            }
            Ok(self.detections.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, SourceImage::new(RgbImage::new(8, 8)))
    }

    fn setup(config: &PipelineConfig) -> Arc<PipelineState> {
        Arc::new(PipelineState::new(config))
    }

    #[test]
    fn test_stride_two_processes_even_frames() {
        let config = PipelineConfig::default();
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state.clone(),
            config.inference.clone(),
        );

        let outcomes: Vec<FrameOutcome> =
            (1..=6).map(|seq| stage.process(frame(seq)).unwrap()).collect();
        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::Skipped,
                FrameOutcome::Inferred(0),
                FrameOutcome::Skipped,
                FrameOutcome::Inferred(0),
                FrameOutcome::Skipped,
                FrameOutcome::Inferred(0),
            ]
        );
        drop(stage);
        let processed: Vec<u64> = detector.calls.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(processed, vec![2, 4, 6]);
        let counters = state.counters.snapshot();
        assert_eq!((counters.retired, counters.skipped, counters.inferred), (6, 3, 3));
        assert_eq!(state.snapshot().sequence, 6);
    }

    #[test]
    fn test_low_confidence_never_becomes_track() {
        let mut config = PipelineConfig::default();
        config.inference.initial_stride = 1;
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![
            RawDetection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0, 0.30),
            RawDetection::new(BBox::new(100.0, 0.0, 10.0, 10.0), 1, 0.35),
        ]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state.clone(),
            config.inference.clone(),
        );

        assert_eq!(stage.process(frame(1)).unwrap(), FrameOutcome::Inferred(1));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.tracks[0].class_id, 1);
        assert_eq!(state.counters.snapshot().filtered, 1);
    }

    #[test]
    fn test_tunables_read_per_frame() {
        let mut config = PipelineConfig::default();
        config.inference.initial_stride = 1;
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state.clone(),
            config.inference.clone(),
        );
        stage.process(frame(1)).unwrap();
        state.update_tunables(|t| {
            t.resolution_tier = 1;
            t.input_size = 320;
            t.confidence_threshold = 0.4;
        });
        stage.process(frame(2)).unwrap();
        drop(stage);
        assert_eq!(detector.calls[0].1.input_size, 416);
        assert_eq!(detector.calls[1].1.input_size, 320);
        assert!((detector.calls[1].1.confidence_threshold - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_order_frame_is_invariant_violation() {
        let config = PipelineConfig::default();
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state,
            config.inference.clone(),
        );
        stage.process(frame(5)).unwrap();
        assert!(matches!(
            stage.process(frame(3)),
            Err(PipelineError::Invariant(_))
        ));
    }

    #[test]
    fn test_failures_escalate_past_threshold() {
        let mut config = PipelineConfig::default();
        config.inference.initial_stride = 1;
        config.inference.max_consecutive_failures = 3;
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![]);
        detector.fail = true;
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state.clone(),
            config.inference.clone(),
        );

        for seq in 1..=3 {
            assert_eq!(stage.process(frame(seq)).unwrap(), FrameOutcome::Failed);
        }
        match stage.process(frame(4)) {
            Err(PipelineError::DetectorBroken { failures, last }) => {
                assert_eq!(failures, 4);
                assert_eq!(last.sequence, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.counters.snapshot().detector_failures, 4);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut config = PipelineConfig::default();
        config.inference.initial_stride = 1;
        config.inference.max_consecutive_failures = 1;
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![]);
        detector.script = VecDeque::from(vec![true, false, true]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state.clone(),
            config.inference.clone(),
        );

        assert_eq!(stage.process(frame(1)).unwrap(), FrameOutcome::Failed);
        assert_eq!(stage.consecutive_failures(), 1);
        assert_eq!(stage.process(frame(2)).unwrap(), FrameOutcome::Inferred(0));
        assert_eq!(stage.consecutive_failures(), 0);
        // 没有清零的话这里会是第二次连续失败, 超过上限
        assert_eq!(stage.process(frame(3)).unwrap(), FrameOutcome::Failed);
        assert_eq!(stage.consecutive_failures(), 1);
        assert_eq!(state.counters.snapshot().detector_failures, 2);
    }

    #[test]
    fn test_malformed_detection_aborts() {
        let mut config = PipelineConfig::default();
        config.inference.initial_stride = 1;
        let state = setup(&config);
        let mut detector = FixedDetector::new(vec![RawDetection::new(
            BBox::new(0.0, f32::NAN, 10.0, 10.0),
            0,
            0.9,
        )]);
        let mut stage = InferenceStage::new(
            &mut detector,
            TemporalSmoother::new(config.smoothing.clone()),
            state,
            config.inference.clone(),
        );
        assert!(matches!(
            stage.process(frame(1)),
            Err(PipelineError::Invariant(_))
        ));
    }
}
