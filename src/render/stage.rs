//! 渲染节拍 (RenderStage)
//!
//! 按固定的 overlay FPS 读取当前快照并交付叠加帧。
//! 从不等待推理: 快照没有更新时照常重绘旧快照。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::overlay::OverlayRenderer;
use super::sink::{AnnotatedFrame, FrameSink};
use crate::error::SinkError;
use crate::pipeline::stats::RateMeter;
use crate::pipeline::PipelineState;

/// FPS 角标的采样窗口
const FPS_WINDOW: Duration = Duration::from_secs(1);

pub struct RenderStage<'a, K: FrameSink + ?Sized> {
    sink: &'a mut K,
    renderer: OverlayRenderer,
    state: Arc<PipelineState>,
    composite: bool,
    next_due: Option<Instant>,
    ticks: u64,
    fps_meter: RateMeter,
    last_fps_sample: Option<Instant>,
}

impl<'a, K: FrameSink + ?Sized> RenderStage<'a, K> {
    pub fn new(
        sink: &'a mut K,
        renderer: OverlayRenderer,
        state: Arc<PipelineState>,
        composite: bool,
    ) -> Self {
        Self {
            sink,
            renderer,
            state,
            composite,
            next_due: None,
            ticks: 0,
            fps_meter: RateMeter::new(),
            last_fps_sample: None,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// 距下一次渲染的时间 (已到期为零)
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_due
            .map(|due| due.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// 到期则渲染一帧, 返回是否渲染
    pub fn tick(&mut self, now: Instant) -> Result<bool, SinkError> {
        if let Some(due) = self.next_due {
            if now < due {
                return Ok(false);
            }
        }
        let overlay_fps = self.state.tunables().overlay_fps.max(0.1);
        let period = Duration::from_secs_f32(1.0 / overlay_fps);
        // 固定节拍; 落后超过一个周期时重新对齐
        let next = self.next_due.map_or(now + period, |due| due + period);
        self.next_due = Some(if next <= now { now + period } else { next });

        self.render_once(now)?;
        Ok(true)
    }

    /// 立即渲染一帧
    pub fn render_once(&mut self, now: Instant) -> Result<(), SinkError> {
        let fps = self.sample_fps(now);
        let snapshot = self.state.snapshot();
        let base = if self.composite {
            self.state.latest_frame()
        } else {
            None
        };

        let (image, drawn) = self.renderer.render(&snapshot, base.as_ref(), fps);
        self.ticks += 1;
        debug!(
            "🖼️  渲染 #{} (快照 #{}, {} 个框)",
            self.ticks, snapshot.sequence, drawn
        );
        metrics::counter!("picam_overlays_rendered_total").increment(1);

        self.sink.present(AnnotatedFrame {
            tick: self.ticks,
            snapshot_sequence: snapshot.sequence,
            drawn,
            rendered_at: now,
            image,
        })
    }

    /// 推理帧率 (出队帧/秒), 每秒更新一次
    fn sample_fps(&mut self, now: Instant) -> Option<f32> {
        let due = self
            .last_fps_sample
            .map_or(true, |last| now.saturating_duration_since(last) >= FPS_WINDOW);
        if due {
            self.last_fps_sample = Some(now);
            self.fps_meter.sample(now, self.state.counters.retired());
        }
        self.fps_meter.rate()
    }
}
