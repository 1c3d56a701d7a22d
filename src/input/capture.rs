//! 采集线程 (CaptureStage)
//!
//! 按摄像头节奏取帧, 分配序号, 推入丢弃最旧帧的队列。
//! 瞬时错误指数退避重试, 设备丢失向上返回致命错误。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::queue::FrameProducer;
use super::source::{Frame, FrameSource};
use crate::config::CameraConfig;
use crate::error::{PipelineError, SourceError};
use crate::pipeline::{PipelineState, Shutdown};

pub struct CaptureStage<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    producer: FrameProducer,
    state: Arc<PipelineState>,
    config: CameraConfig,
    /// 保留最新帧供渲染合成
    keep_latest: bool,
    next_sequence: u64,
    backoff: Duration,
}

impl<'a, S: FrameSource + ?Sized> CaptureStage<'a, S> {
    pub fn new(
        source: &'a mut S,
        producer: FrameProducer,
        state: Arc<PipelineState>,
        config: CameraConfig,
    ) -> Self {
        let backoff = Duration::from_millis(config.retry_backoff_ms);
        Self {
            source,
            producer,
            state,
            config,
            keep_latest: false,
            next_sequence: 1,
            backoff,
        }
    }

    pub fn keep_latest(mut self, keep: bool) -> Self {
        self.keep_latest = keep;
        self
    }

    /// 采集主循环, 直到停止信号或设备丢失
    ///
    /// 返回时 `producer` 被丢弃, 推理线程随之观察到队列断开
    pub fn run(mut self, shutdown: &Shutdown) -> Result<u64, PipelineError> {
        info!("✅ 采集线程启动");
        let deadline = self.config.frame_deadline();

        while !shutdown.is_triggered() {
            let now = Instant::now();
            let due = now.checked_add(deadline).unwrap_or(now);
            match self.source.next_frame(due) {
                Ok(image) => {
                    self.backoff = Duration::from_millis(self.config.retry_backoff_ms);
                    self.push(Frame::new(self.next_sequence, image));
                    self.next_sequence += 1;
                }
                Err(SourceError::Timeout) => continue,
                Err(SourceError::Transient(reason)) => {
                    self.state.counters.record_capture_error();
                    warn!(
                        "⚠️  取帧失败: {} ({}ms 后重试)",
                        reason,
                        self.backoff.as_millis()
                    );
                    if !shutdown.sleep(self.backoff) {
                        break;
                    }
                    let max = Duration::from_millis(self.config.max_retry_backoff_ms);
                    self.backoff = (self.backoff * 2).min(max);
                }
                Err(SourceError::DeviceLost(reason)) => {
                    return Err(PipelineError::DeviceLost(reason));
                }
            }
        }

        let captured = self.next_sequence - 1;
        info!("✅ 采集线程退出 (共 {} 帧)", captured);
        Ok(captured)
    }

    fn push(&mut self, frame: Frame) {
        self.state.counters.record_capture();
        if self.keep_latest {
            self.state.publish_frame(&frame);
        }
        if let Some(evicted) = self.producer.push(frame) {
            self.state.counters.record_drop();
            debug!("🗑️  队列已满, 丢弃帧 #{}", evicted.sequence);
        }
        metrics::gauge!("picam_queue_depth").set(self.producer.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::input::queue::frame_queue;
    use crate::input::source::{SourceImage, SourceInfo};
    use image::RgbImage;
    use std::collections::VecDeque;

    /// 按脚本返回结果的假摄像头
    struct ScriptedSource {
        script: VecDeque<Result<(), SourceError>>,
        shutdown: Arc<Shutdown>,
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<SourceInfo, SourceError> {
            Ok(SourceInfo {
                name: "scripted".into(),
                width: 4,
                height: 4,
                fps: 30.0,
            })
        }

        fn next_frame(&mut self, _deadline: Instant) -> Result<SourceImage, SourceError> {
            match self.script.pop_front() {
                Some(Ok(())) => Ok(SourceImage::new(RgbImage::new(4, 4))),
                Some(Err(err)) => Err(err),
                None => {
                    self.shutdown.trigger();
                    Err(SourceError::Timeout)
                }
            }
        }

        fn close(&mut self) {}
    }

    fn camera_config() -> CameraConfig {
        CameraConfig {
            retry_backoff_ms: 1,
            max_retry_backoff_ms: 4,
            ..PipelineConfig::default().camera
        }
    }

    #[test]
    fn test_sequences_assigned_and_drops_counted() {
        let shutdown = Arc::new(Shutdown::new());
        let state = Arc::new(PipelineState::new(&PipelineConfig::default()));
        let (producer, consumer) = frame_queue(2).unwrap();
        let mut source = ScriptedSource {
            script: (0..5).map(|_| Ok(())).collect(),
            shutdown: shutdown.clone(),
        };

        let captured = CaptureStage::new(&mut source, producer, state.clone(), camera_config())
            .run(&shutdown)
            .unwrap();

        assert_eq!(captured, 5);
        let counters = state.counters.snapshot();
        assert_eq!(counters.captured, 5);
        assert_eq!(counters.dropped, 3);
        let remaining: Vec<u64> = std::iter::from_fn(|| consumer.try_pop())
            .map(|f| f.sequence)
            .collect();
        assert_eq!(remaining, vec![4, 5]);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let shutdown = Arc::new(Shutdown::new());
        let state = Arc::new(PipelineState::new(&PipelineConfig::default()));
        let (producer, consumer) = frame_queue(8).unwrap();
        let script = vec![
            Ok(()),
            Err(SourceError::Transient("usb hiccup".into())),
            Err(SourceError::Transient("usb hiccup".into())),
            Ok(()),
        ];
        let mut source = ScriptedSource {
            script: script.into(),
            shutdown: shutdown.clone(),
        };

        let captured = CaptureStage::new(&mut source, producer, state.clone(), camera_config())
            .run(&shutdown)
            .unwrap();

        assert_eq!(captured, 2);
        assert_eq!(state.counters.snapshot().capture_errors, 2);
        assert_eq!(consumer.try_pop().unwrap().sequence, 1);
        assert_eq!(consumer.try_pop().unwrap().sequence, 2);
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let shutdown = Arc::new(Shutdown::new());
        let state = Arc::new(PipelineState::new(&PipelineConfig::default()));
        let (producer, _consumer) = frame_queue(2).unwrap();
        let mut source = ScriptedSource {
            script: vec![Ok(()), Err(SourceError::DeviceLost("unplugged".into()))].into(),
            shutdown: shutdown.clone(),
        };

        let result =
            CaptureStage::new(&mut source, producer, state, camera_config()).run(&shutdown);
        assert!(matches!(result, Err(PipelineError::DeviceLost(_))));
    }

    #[test]
    fn test_huge_deadline_does_not_overflow() {
        let shutdown = Arc::new(Shutdown::new());
        let state = Arc::new(PipelineState::new(&PipelineConfig::default()));
        let (producer, consumer) = frame_queue(2).unwrap();
        let mut source = ScriptedSource {
            script: vec![Ok(())].into(),
            shutdown: shutdown.clone(),
        };
        let config = CameraConfig {
            frame_deadline_ms: u64::MAX,
            ..camera_config()
        };

        let captured = CaptureStage::new(&mut source, producer, state, config)
            .run(&shutdown)
            .unwrap();
        assert_eq!(captured, 1);
        assert_eq!(consumer.try_pop().map(|f| f.sequence), Some(1));
    }

    #[test]
    fn test_keep_latest_publishes_frame() {
        let shutdown = Arc::new(Shutdown::new());
        let state = Arc::new(PipelineState::new(&PipelineConfig::default()));
        let (producer, _consumer) = frame_queue(1).unwrap();
        let mut source = ScriptedSource {
            script: vec![Ok(()), Ok(()), Ok(())].into(),
            shutdown: shutdown.clone(),
        };

        CaptureStage::new(&mut source, producer, state.clone(), camera_config())
            .keep_latest(true)
            .run(&shutdown)
            .unwrap();
        assert_eq!(state.latest_frame().map(|f| f.sequence), Some(3));
    }
}
