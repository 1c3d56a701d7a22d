use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
/// 实时检测演示 (合成摄像头 + 颜色键检测器)
///
/// 主程序入口 - 直接运行: cargo run --bin picam-fast --release
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use yolo_picam_rs::render::FrameSink;
use yolo_picam_rs::{
    ColorKeyDetector, NullSink, Pipeline, PipelineConfig, PngSequenceSink, SyntheticCamera,
    SyntheticConfig,
};

/// 实时检测程序
#[derive(Parser, Debug)]
#[command(author, version, about = "实时检测流水线 (采集/推理/平滑/渲染)", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "picam_config.json")]
    config: PathBuf,

    /// 运行时长 (秒), 0 表示直到 Ctrl+C
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// 叠加帧PNG输出目录
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    font: Option<String>,

    /// 目标推理帧率
    #[arg(long)]
    target_fps: Option<f32>,

    /// 叠加层渲染帧率
    #[arg(long)]
    overlay_fps: Option<f32>,

    /// 初始跳帧间隔
    #[arg(long)]
    stride: Option<u32>,

    /// 推理置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 摄像头宽度
    #[arg(long)]
    width: Option<u32>,

    /// 摄像头高度
    #[arg(long)]
    height: Option<u32>,

    /// 合成画面中的目标数量
    #[arg(long, default_value_t = 3)]
    objects: usize,

    /// 合成画面随机种子
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// 模拟推理耗时 (毫秒, 416输入下)
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// 把叠加层合成到采集帧上
    #[arg(long)]
    composite: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(fps) = self.target_fps {
            config.adaptive.target_fps = fps;
        }
        if let Some(fps) = self.overlay_fps {
            config.render.overlay_fps = fps;
        }
        if let Some(stride) = self.stride {
            config.inference.initial_stride = stride;
        }
        if let Some(conf) = self.conf {
            config.inference.confidence_threshold = conf;
            config.inference.max_confidence_threshold =
                config.inference.max_confidence_threshold.max(conf);
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(font) = &self.font {
            config.render.font_path = Some(font.clone());
        }
        if self.composite {
            config.render.composite = true;
        }
    }
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let mut config = PipelineConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    args.apply(&mut config);

    let camera = SyntheticCamera::new(SyntheticConfig {
        width: config.camera.width,
        height: config.camera.height,
        fps: config.camera.fps,
        objects: args.objects,
        seed: args.seed,
        ..SyntheticConfig::default()
    });
    let detector =
        ColorKeyDetector::new().with_simulated_latency(Duration::from_millis(args.latency_ms));
    let sink: Box<dyn FrameSink> = match &args.output_dir {
        Some(dir) => Box::new(
            PngSequenceSink::new(dir, config.render.save_every)
                .with_context(|| format!("无法创建输出目录 {}", dir.display()))?,
        ),
        None => Box::new(NullSink::default()),
    };

    info!(
        "✅ 目标 {:.1}fps | 叠加 {:.1}fps | stride {} | 输入 {:?} | 阈值 {:.2}",
        config.adaptive.target_fps,
        config.render.overlay_fps,
        config.inference.initial_stride,
        config.inference.resolution_tiers,
        config.inference.confidence_threshold
    );

    let pipeline = Pipeline::new(config, camera, detector, sink)?;
    let shutdown = pipeline.shutdown_handle();

    if let Err(err) = ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || shutdown.trigger()
    }) {
        warn!("⚠️  无法安装 Ctrl+C 处理器: {err}");
    }

    if args.duration > 0 {
        let timer = Arc::clone(&shutdown);
        let duration = Duration::from_secs(args.duration);
        std::thread::Builder::new()
            .name("timer".into())
            .spawn(move || {
                if timer.sleep(duration) {
                    info!("⏱️  已运行 {}s, 停止", duration.as_secs());
                    timer.trigger();
                }
            })
            .context("无法启动计时线程")?;
    }

    let report = pipeline.run()?;

    let c = &report.counters;
    info!(
        "📊 帧源 {} | 检测器 {} | 关联 {}",
        report.source.name, report.detector, report.associator
    );
    info!(
        "📊 采集 {} | 丢弃 {} | 推理 {} (均值 {:.1}ms) | 跳过 {} | 失败 {} | 快照 {} | 渲染 {}",
        c.captured,
        c.dropped,
        c.inferred,
        c.mean_inference_ms,
        c.skipped,
        c.detector_failures,
        c.snapshots,
        report.rendered
    );
    let t = report.final_tunables;
    info!(
        "🎛️  最终参数: stride {} | 输入 {} | 阈值 {:.2} | 调整 {} 次",
        t.stride,
        t.input_size,
        t.confidence_threshold,
        report.adjustments.len()
    );
    Ok(())
}
