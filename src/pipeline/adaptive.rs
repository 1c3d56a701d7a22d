//! 自适应控制器 (AdaptiveController)
//!
//! 定时采样一个窗口的采集帧率, 出队帧率与平均推理耗时, 带滞回地调整参数:
//! - 有效目标 = min(目标帧率, 采集帧率); 摄像头本身达不到目标时不降级
//! - 连续 N 个窗口出队帧率低于有效目标: stride +1 → 降低分辨率档位 → 提高置信度阈值
//! - 连续 N 个窗口按推理耗时估算放宽一级后仍有余量: 按相反顺序逐级恢复
//!
//! 每次只调整一级, 调整后两个计数都清零; 所有改动在状态锁内一次完成。

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::state::{PipelineState, Tunables};
use super::stats::RateMeter;
use crate::config::{AdaptiveConfig, InferenceConfig};

/// 阈值比较容差
const THRESHOLD_EPS: f32 = 1e-4;

/// 单次调整
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Adjustment {
    StrideUp { from: u32, to: u32 },
    StrideDown { from: u32, to: u32 },
    /// 推理输入尺寸变化 (像素边长)
    ResolutionDown { from: u32, to: u32 },
    ResolutionUp { from: u32, to: u32 },
    ThresholdUp { from: f32, to: f32 },
    ThresholdDown { from: f32, to: f32 },
}

/// 一个评估窗口的测量值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSample {
    /// 推理线程出队速率 (推理 + 跳过)
    pub achieved_fps: f32,
    /// 采集速率 (未知时为 None)
    pub capture_fps: Option<f32>,
    /// 窗口内平均单次推理耗时 (窗口内没有推理时为 None)
    pub mean_latency: Option<Duration>,
}

pub struct AdaptiveController {
    config: AdaptiveConfig,
    bounds: InferenceConfig,
    slow_streak: u32,
    fast_streak: u32,
    retire_meter: RateMeter,
    capture_meter: RateMeter,
    /// 上个窗口结束时的 (推理次数, 推理总耗时)
    inference_mark: (u64, Duration),
    next_tick: Option<Instant>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig, bounds: InferenceConfig) -> Self {
        Self {
            config,
            bounds,
            slow_streak: 0,
            fast_streak: 0,
            retire_meter: RateMeter::new(),
            capture_meter: RateMeter::new(),
            inference_mark: (0, Duration::ZERO),
            next_tick: None,
        }
    }

    pub fn streaks(&self) -> (u32, u32) {
        (self.slow_streak, self.fast_streak)
    }

    /// 最近一个窗口测得的出队帧率
    pub fn last_rate(&self) -> Option<f32> {
        self.retire_meter.rate()
    }

    /// 由定时循环调用; 到达评估时刻时采样一个窗口并评估
    pub fn tick(&mut self, now: Instant, state: &PipelineState) -> Option<Adjustment> {
        if !self.config.enabled {
            return None;
        }
        if matches!(self.next_tick, Some(due) if now < due) {
            return None;
        }
        self.next_tick = Some(now + self.config.interval());

        let counters = &state.counters;
        let achieved = self.retire_meter.sample(now, counters.retired());
        let capture_fps = self.capture_meter.sample(now, counters.captured());
        let (inferred, busy) = counters.inference_totals();
        let (prev_inferred, prev_busy) =
            std::mem::replace(&mut self.inference_mark, (inferred, busy));
        let window_inferred = inferred.saturating_sub(prev_inferred);
        let mean_latency = (window_inferred > 0)
            .then(|| busy.saturating_sub(prev_busy).div_f64(window_inferred as f64));

        // 首次调用只建立基线
        let achieved_fps = achieved?;
        metrics::gauge!("picam_inference_fps").set(f64::from(achieved_fps));
        if let Some(fps) = capture_fps {
            metrics::gauge!("picam_capture_fps").set(f64::from(fps));
        }
        self.observe(
            WindowSample {
                achieved_fps,
                capture_fps,
                mean_latency,
            },
            state,
        )
    }

    /// 喂入一个窗口的测量值
    pub fn observe(&mut self, sample: WindowSample, state: &PipelineState) -> Option<Adjustment> {
        let tunables = state.tunables();
        let target = sample
            .capture_fps
            .map_or(tunables.target_fps, |capture| capture.min(tunables.target_fps));
        let slow = sample.achieved_fps < target - self.config.slow_tolerance();
        let fast = !slow && self.has_headroom(&tunables, sample.mean_latency, target);

        if slow {
            self.slow_streak += 1;
            self.fast_streak = 0;
        } else if fast {
            self.fast_streak += 1;
            self.slow_streak = 0;
        } else {
            self.slow_streak = 0;
            self.fast_streak = 0;
            return None;
        }
        debug!(
            "📈 推理 {:.1}fps / 有效目标 {:.1}fps (慢 {}, 快 {})",
            sample.achieved_fps, target, self.slow_streak, self.fast_streak
        );

        let adjustment = if self.slow_streak >= self.config.windows {
            Some(state.update_tunables(|t| self.degrade(t)))
        } else if self.fast_streak >= self.config.windows {
            Some(state.update_tunables(|t| self.relax(t)))
        } else {
            None
        };

        let adjustment = adjustment?;
        self.slow_streak = 0;
        self.fast_streak = 0;
        if let Some(change) = adjustment {
            info!(
                "🎛️  自适应调整 ({:.1}fps → 目标 {:.1}fps): {:?}",
                sample.achieved_fps, target, change
            );
        }
        adjustment
    }

    /// 放宽一级后的出队能力是否仍高于有效目标 + 容差
    ///
    /// 每次推理对应 stride 个出队帧, 推理耗时按输入面积缩放
    fn has_headroom(&self, t: &Tunables, latency: Option<Duration>, target: f32) -> bool {
        let Some(latency) = latency else {
            return false;
        };
        let mut next = *t;
        if self.relax(&mut next).is_none() {
            return false;
        }
        let area_scale = (next.input_size as f32 / t.input_size.max(1) as f32).powi(2);
        let cost = latency.as_secs_f32() * area_scale;
        let projected = if cost > 0.0 {
            next.stride as f32 / cost
        } else {
            f32::INFINITY
        };
        projected > target + self.config.fast_tolerance()
    }

    /// 降级一步; 全部到达极限时不变
    fn degrade(&self, t: &mut Tunables) -> Option<Adjustment> {
        let b = &self.bounds;
        if t.stride < b.max_stride {
            let from = t.stride;
            t.stride += 1;
            return Some(Adjustment::StrideUp { from, to: t.stride });
        }
        if t.resolution_tier + 1 < b.resolution_tiers.len() {
            let from = t.input_size;
            t.resolution_tier += 1;
            t.input_size = b.resolution_tiers[t.resolution_tier];
            return Some(Adjustment::ResolutionDown {
                from,
                to: t.input_size,
            });
        }
        let step = self.config.confidence_step;
        if step > 0.0 && t.confidence_threshold < b.max_confidence_threshold - THRESHOLD_EPS {
            let from = t.confidence_threshold;
            let next = from + step;
            t.confidence_threshold = if next >= b.max_confidence_threshold - THRESHOLD_EPS {
                b.max_confidence_threshold
            } else {
                next
            };
            return Some(Adjustment::ThresholdUp {
                from,
                to: t.confidence_threshold,
            });
        }
        None
    }

    /// 恢复一步; 已在最优档位时不变
    fn relax(&self, t: &mut Tunables) -> Option<Adjustment> {
        let b = &self.bounds;
        let step = self.config.confidence_step;
        if step > 0.0 && t.confidence_threshold > b.confidence_threshold + THRESHOLD_EPS {
            let from = t.confidence_threshold;
            let next = from - step;
            t.confidence_threshold = if next <= b.confidence_threshold + THRESHOLD_EPS {
                b.confidence_threshold
            } else {
                next
            };
            return Some(Adjustment::ThresholdDown {
                from,
                to: t.confidence_threshold,
            });
        }
        if t.resolution_tier > 0 {
            let from = t.input_size;
            t.resolution_tier -= 1;
            t.input_size = b.resolution_tiers[t.resolution_tier];
            return Some(Adjustment::ResolutionUp {
                from,
                to: t.input_size,
            });
        }
        if t.stride > b.min_stride {
            let from = t.stride;
            t.stride -= 1;
            return Some(Adjustment::StrideDown { from, to: t.stride });
        }
        None
    }
}
