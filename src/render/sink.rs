//! 输出端 (FrameSink)
//! 渲染线程每个节拍交付一张完整的叠加帧

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use image::RgbaImage;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::gen_time_string;

/// 渲染结果
#[derive(Clone)]
pub struct AnnotatedFrame {
    /// 渲染节拍序号 (从1开始)
    pub tick: u64,
    /// 所用检测快照的帧序号
    pub snapshot_sequence: u64,
    /// 实际绘制的检测数 (显示阈值过滤后)
    pub drawn: usize,
    pub rendered_at: Instant,
    pub image: RgbaImage,
}

/// 输出端接口
pub trait FrameSink: Send {
    fn present(&mut self, frame: AnnotatedFrame) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn present(&mut self, frame: AnnotatedFrame) -> Result<(), SinkError> {
        (**self).present(frame)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// 丢弃所有帧, 只计数
#[derive(Debug, Default)]
pub struct NullSink {
    pub presented: u64,
}

impl FrameSink for NullSink {
    fn present(&mut self, _frame: AnnotatedFrame) -> Result<(), SinkError> {
        self.presented += 1;
        Ok(())
    }
}

/// 每 N 帧保存一张PNG, 文件名带时间戳
pub struct PngSequenceSink {
    dir: PathBuf,
    every: u64,
    presented: u64,
    written: Vec<PathBuf>,
}

impl PngSequenceSink {
    pub fn new(dir: impl AsRef<Path>, every: u32) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("💾 叠加帧输出目录: {} (每 {} 帧)", dir.display(), every.max(1));
        Ok(Self {
            dir,
            every: u64::from(every.max(1)),
            presented: 0,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl FrameSink for PngSequenceSink {
    fn present(&mut self, frame: AnnotatedFrame) -> Result<(), SinkError> {
        self.presented += 1;
        if self.presented % self.every != 0 {
            return Ok(());
        }
        let name = format!("overlay_{}_{:06}.png", gen_time_string("-"), frame.tick);
        let path = self.dir.join(name);
        frame.image.save(&path).map_err(|source| SinkError::Image {
            path: path.clone(),
            source,
        })?;
        debug!("💾 已保存 {}", path.display());
        self.written.push(path);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        info!(
            "💾 共保存 {} 张叠加帧到 {}",
            self.written.len(),
            self.dir.display()
        );
        Ok(())
    }
}

/// 转发到通道 (显示线程等消费者); 消费者跟不上时丢弃
pub struct ChannelSink {
    tx: Sender<AnnotatedFrame>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<AnnotatedFrame>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn present(&mut self, frame: AnnotatedFrame) -> Result<(), SinkError> {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            // 消费者已退出, 不视为错误
            Err(TrySendError::Disconnected(_)) => self.dropped += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tick: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            tick,
            snapshot_sequence: 0,
            drawn: 0,
            rendered_at: Instant::now(),
            image: RgbaImage::new(4, 4),
        }
    }

    #[test]
    fn test_png_sink_writes_every_nth() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = PngSequenceSink::new(dir.path().join("out"), 2).unwrap();
        for tick in 1..=5 {
            sink.present(frame(tick)).unwrap();
        }
        sink.close().unwrap();
        assert_eq!(sink.written().len(), 2);
        for path in sink.written() {
            assert!(path.exists());
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        }
        assert!(sink.written()[0]
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap()
            .ends_with("_000002.png"));
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = ChannelSink::new(tx);
        sink.present(frame(1)).unwrap();
        sink.present(frame(2)).unwrap();
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().tick, 1);
    }
}
