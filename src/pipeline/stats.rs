//! 运行统计: 原子计数器 + 速率计
//! Lock-free counters shared between stages, mirrored to the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 各阶段写入, 控制器/状态日志读取
#[derive(Debug, Default)]
pub struct PipelineCounters {
    captured: AtomicU64,
    dropped: AtomicU64,
    retired: AtomicU64,
    inferred: AtomicU64,
    skipped: AtomicU64,
    detector_failures: AtomicU64,
    capture_errors: AtomicU64,
    snapshots: AtomicU64,
    filtered: AtomicU64,
    inference_micros_total: AtomicU64,
    last_inference_micros: AtomicU64,
}

/// 计数器的一次性读数
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CounterSnapshot {
    pub captured: u64,
    pub dropped: u64,
    /// 推理线程出队的帧数 (推理 + 跳过)
    pub retired: u64,
    pub inferred: u64,
    pub skipped: u64,
    pub detector_failures: u64,
    pub capture_errors: u64,
    pub snapshots: u64,
    /// 低于推理阈值被过滤的检测数
    pub filtered: u64,
    pub last_inference_ms: f64,
    pub mean_inference_ms: f64,
}

impl PipelineCounters {
    pub fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("picam_frames_captured_total").increment(1);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("picam_frames_dropped_total").increment(1);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("picam_capture_errors_total").increment(1);
    }

    pub fn record_retired(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("picam_frames_skipped_total").increment(1);
    }

    pub fn record_inference(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        self.inferred.fetch_add(1, Ordering::Relaxed);
        self.inference_micros_total
            .fetch_add(micros, Ordering::Relaxed);
        self.last_inference_micros.store(micros, Ordering::Relaxed);
        metrics::counter!("picam_frames_inferred_total").increment(1);
        metrics::histogram!("picam_inference_latency_seconds").record(latency.as_secs_f64());
    }

    pub fn record_detector_failure(&self) {
        self.detector_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("picam_detector_failures_total").increment(1);
    }

    pub fn record_filtered(&self, count: u64) {
        if count > 0 {
            self.filtered.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }

    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// (累计推理次数, 累计推理耗时)
    pub fn inference_totals(&self) -> (u64, Duration) {
        (
            self.inferred.load(Ordering::Relaxed),
            Duration::from_micros(self.inference_micros_total.load(Ordering::Relaxed)),
        )
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let inferred = self.inferred.load(Ordering::Relaxed);
        let total = self.inference_micros_total.load(Ordering::Relaxed);
        CounterSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            inferred,
            skipped: self.skipped.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            last_inference_ms: self.last_inference_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
            mean_inference_ms: if inferred == 0 {
                0.0
            } else {
                total as f64 / inferred as f64 / 1000.0
            },
        }
    }
}

/// 基于计数器差值的速率计
#[derive(Debug, Clone)]
pub struct RateMeter {
    last: Option<(Instant, u64)>,
    rate: Option<f32>,
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateMeter {
    pub fn new() -> Self {
        Self {
            last: None,
            rate: None,
        }
    }

    /// 喂入当前计数, 返回距上次采样的速率 (首次调用只建立基线)
    pub fn sample(&mut self, now: Instant, count: u64) -> Option<f32> {
        let rate = match self.last {
            Some((at, prev)) => {
                let elapsed = now.saturating_duration_since(at).as_secs_f32();
                if elapsed <= 0.0 {
                    return self.rate;
                }
                Some(count.saturating_sub(prev) as f32 / elapsed)
            }
            None => None,
        };
        self.last = Some((now, count));
        if rate.is_some() {
            self.rate = rate;
        }
        rate
    }

    pub fn rate(&self) -> Option<f32> {
        self.rate
    }
}
