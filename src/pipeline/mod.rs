//! 流水线编排 (Pipeline)
//!
//! 线程模型:
//! - capture 线程:   FrameSource → 帧队列 (丢弃最旧帧)
//! - inference 线程: 帧队列 → Detector → TemporalSmoother → 快照
//! - 调用线程:       固定节拍渲染 + 自适应控制 + 状态日志
//!
//! 所有线程在作用域内运行; 停止时先汇合全部线程, 再关闭帧源与输出端。

pub mod adaptive;
pub mod shutdown;
pub mod state;
pub mod stats;

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

pub use adaptive::{AdaptiveController, Adjustment, WindowSample};
pub use shutdown::Shutdown;
pub use state::{PipelineState, Tunables};
pub use stats::{CounterSnapshot, PipelineCounters, RateMeter};

use crate::config::PipelineConfig;
use crate::detection::{
    Associator, Detector, GreedyNearestAssociator, InferenceStage, TemporalSmoother,
};
use crate::error::PipelineError;
use crate::input::{frame_queue, CaptureStage, FrameSource, SourceInfo};
use crate::render::{FrameSink, OverlayRenderer, RenderStage};

/// 调用线程最长空闲时间 (控制器/状态日志的调度粒度)
const MAX_IDLE: Duration = Duration::from_millis(50);

/// 运行结束后的汇总
#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub source: SourceInfo,
    pub detector: String,
    pub associator: &'static str,
    pub counters: CounterSnapshot,
    pub final_tunables: Tunables,
    /// 交付给输出端的叠加帧数
    pub rendered: u64,
    pub adjustments: Vec<Adjustment>,
    pub elapsed: Duration,
}

pub struct Pipeline<S, D, K, A = GreedyNearestAssociator>
where
    S: FrameSource,
    D: Detector,
    K: FrameSink,
    A: Associator,
{
    config: PipelineConfig,
    source: S,
    detector: D,
    sink: K,
    associator: A,
    state: Arc<PipelineState>,
    shutdown: Arc<Shutdown>,
}

impl<S, D, K> Pipeline<S, D, K>
where
    S: FrameSource,
    D: Detector,
    K: FrameSink,
{
    /// 校验配置并组装流水线 (尚未打开帧源)
    pub fn new(
        config: PipelineConfig,
        source: S,
        detector: D,
        sink: K,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let state = Arc::new(PipelineState::new(&config));
        Ok(Self {
            config,
            source,
            detector,
            sink,
            associator: GreedyNearestAssociator,
            state,
            shutdown: Arc::new(Shutdown::new()),
        })
    }
}

impl<S, D, K, A> Pipeline<S, D, K, A>
where
    S: FrameSource,
    D: Detector,
    K: FrameSink,
    A: Associator,
{
    /// 替换关联器
    pub fn with_associator<B: Associator>(self, associator: B) -> Pipeline<S, D, K, B> {
        Pipeline {
            config: self.config,
            source: self.source,
            detector: self.detector,
            sink: self.sink,
            associator,
            state: self.state,
            shutdown: self.shutdown,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 共享状态 (可在运行期间从其他线程观察)
    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    /// 停止句柄; `trigger()` 请求停止
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// 运行直到停止信号或致命错误
    pub fn run(self) -> Result<PipelineReport, PipelineError> {
        let Pipeline {
            config,
            mut source,
            mut detector,
            mut sink,
            associator,
            state,
            shutdown,
        } = self;
        let started = Instant::now();

        info!("🚀 启动流水线");
        let source_info = source
            .open()
            .map_err(|err| PipelineError::SourceOpen(err.to_string()))?;
        info!(
            "📷 帧源: {} ({}x{} @ {:.1}fps)",
            source_info.name, source_info.width, source_info.height, source_info.fps
        );

        let renderer = match OverlayRenderer::new(
            config.render.clone(),
            config.class_names.clone(),
            source_info.width,
            source_info.height,
        ) {
            Ok(renderer) => renderer,
            Err(err) => {
                source.close();
                return Err(err.into());
            }
        };
        let (producer, consumer) = match frame_queue(config.queue_capacity) {
            Ok(queue) => queue,
            Err(err) => {
                source.close();
                return Err(err);
            }
        };

        let detector_name = detector.name().to_string();
        let associator_name = associator.name();
        let smoother = TemporalSmoother::with_associator(config.smoothing.clone(), associator);
        let mut controller =
            AdaptiveController::new(config.adaptive.clone(), config.inference.clone());
        let mut adjustments = Vec::new();
        let mut rendered = 0;

        thread::scope(|scope| {
            let capture = {
                let stage = CaptureStage::new(
                    &mut source,
                    producer,
                    state.clone(),
                    config.camera.clone(),
                )
                .keep_latest(config.render.composite);
                let shutdown = &shutdown;
                spawn_stage(scope, "capture", move || {
                    if let Err(err) = stage.run(shutdown) {
                        shutdown.fail(err);
                    }
                })
            };

            let inference = {
                let stage = InferenceStage::new(
                    &mut detector,
                    smoother,
                    state.clone(),
                    config.inference.clone(),
                );
                let shutdown = &shutdown;
                spawn_stage(scope, "inference", move || {
                    if let Err(err) = stage.run(consumer, shutdown) {
                        shutdown.fail(err);
                    }
                    // 推理结束后采集没有意义
                    shutdown.trigger();
                })
            };

            let mut handles = Vec::new();
            for (name, spawned) in [("capture", capture), ("inference", inference)] {
                match spawned {
                    Ok(handle) => handles.push((name, handle)),
                    Err(err) => {
                        error!("❌ 无法启动 {} 线程: {}", name, err);
                        shutdown.fail(PipelineError::StageCrashed(name));
                    }
                }
            }

            let mut render = RenderStage::new(
                &mut sink,
                renderer,
                state.clone(),
                config.render.composite,
            );
            let mut status = StatusLog::new(config.render.status_interval());

            while !shutdown.is_triggered() {
                let now = Instant::now();
                if let Err(err) = render.tick(now) {
                    shutdown.fail(err.into());
                    break;
                }
                if let Some(change) = controller.tick(now, &state) {
                    adjustments.push(change);
                }
                status.tick(now, &state);

                // 阶段线程只会在停止后退出; 提前结束说明已崩溃
                if handles.iter().any(|(_, handle)| handle.is_finished()) {
                    shutdown.trigger();
                    break;
                }

                let wait = render.time_until_due(Instant::now()).min(MAX_IDLE);
                shutdown.sleep(wait.max(Duration::from_millis(1)));
            }
            rendered = render.ticks();

            for (name, handle) in handles {
                if handle.join().is_err() {
                    error!("❌ {} 线程崩溃", name);
                    shutdown.fail(PipelineError::StageCrashed(name));
                }
            }
        });

        // 所有线程已汇合, 释放资源
        drop(detector);
        source.close();
        if let Err(err) = sink.close() {
            shutdown.fail(err.into());
        }

        let report = PipelineReport {
            source: source_info,
            detector: detector_name,
            associator: associator_name,
            counters: state.counters.snapshot(),
            final_tunables: state.tunables(),
            rendered,
            adjustments,
            elapsed: started.elapsed(),
        };

        match shutdown.take_error() {
            Some(err) => Err(err),
            None => {
                info!(
                    "🏁 流水线结束: 采集 {} 帧, 丢弃 {}, 推理 {}, 跳过 {}, 渲染 {} ({:.1}s)",
                    report.counters.captured,
                    report.counters.dropped,
                    report.counters.inferred,
                    report.counters.skipped,
                    report.rendered,
                    report.elapsed.as_secs_f32()
                );
                Ok(report)
            }
        }
    }
}

/// 启动具名线程, 继承当前 tracing dispatcher
fn spawn_stage<'scope, 'env, F, T>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: &str,
    f: F,
) -> io::Result<thread::ScopedJoinHandle<'scope, T>>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, move || tracing::dispatcher::with_default(&dispatch, f))
}

/// 周期性状态日志
struct StatusLog {
    interval: Duration,
    next: Option<Instant>,
    capture_meter: RateMeter,
    retire_meter: RateMeter,
}

impl StatusLog {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
            capture_meter: RateMeter::new(),
            retire_meter: RateMeter::new(),
        }
    }

    fn tick(&mut self, now: Instant, state: &PipelineState) {
        if matches!(self.next, Some(due) if now < due) {
            return;
        }
        self.next = Some(now + self.interval);

        let c = state.counters.snapshot();
        let capture_fps = self.capture_meter.sample(now, c.captured);
        let retire_fps = self.retire_meter.sample(now, c.retired);
        let (Some(capture_fps), Some(retire_fps)) = (capture_fps, retire_fps) else {
            return;
        };

        // 队列深度 = 入队 - 挤出 - 出队
        let depth = c.captured.saturating_sub(c.dropped + c.retired);
        let t = state.tunables();
        let tracks = state.snapshot().len();
        info!(
            "📊 采集 {:.1}fps | 推理 {:.1}fps | 队列 {} | 轨迹 {} | stride {} | 输入 {} | 阈值 {:.2} | 推理耗时 {:.1}ms",
            capture_fps,
            retire_fps,
            depth,
            tracks,
            t.stride,
            t.input_size,
            t.confidence_threshold,
            c.last_inference_ms
        );
        if c.detector_failures > 0 || c.capture_errors > 0 {
            warn!(
                "⚠️  累计推理失败 {} 次, 取帧失败 {} 次",
                c.detector_failures, c.capture_errors
            );
        }
    }
}
