//! 合成摄像头 - 无需硬件的测试帧源
//!
//! 在深色背景上绘制若干按类别着色的运动方块, 碰到边缘反弹。
//! 按配置帧率节拍输出, 超过截止时间返回 `SourceError::Timeout`。

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::source::{FrameSource, SourceImage, SourceInfo};
use crate::detection::color_key::{key_color, KEY_COLORS};
use crate::error::SourceError;

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 28]);

/// 合成摄像头参数
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    /// 运动目标数量
    pub objects: usize,
    pub seed: u64,
    /// 每帧位置随机抖动 (像素)
    pub jitter_px: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            objects: 3,
            seed: 7,
            jitter_px: 1.5,
        }
    }
}

#[derive(Clone, Debug)]
struct MovingObject {
    class_id: u32,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    vx: f32,
    vy: f32,
}

impl MovingObject {
    fn step(&mut self, width: f32, height: f32) {
        self.x += self.vx;
        self.y += self.vy;
        if self.x < 0.0 || self.x + self.w > width {
            self.vx = -self.vx;
            self.x = self.x.clamp(0.0, (width - self.w).max(0.0));
        }
        if self.y < 0.0 || self.y + self.h > height {
            self.vy = -self.vy;
            self.y = self.y.clamp(0.0, (height - self.h).max(0.0));
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    rng: StdRng,
    objects: Vec<MovingObject>,
    period: Duration,
    next_due: Option<Instant>,
    opened: bool,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        let period = Duration::from_secs_f32(1.0 / config.fps.max(0.1));
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            objects: Vec::new(),
            period,
            next_due: None,
            opened: false,
        }
    }

    fn spawn_objects(&mut self) {
        let (w, h) = (self.config.width as f32, self.config.height as f32);
        let count = self.config.objects;
        self.objects = (0..count)
            .map(|i| {
                let ow = self.rng.gen_range(w / 12.0..w / 6.0);
                let oh = self.rng.gen_range(h / 10.0..h / 5.0);
                MovingObject {
                    class_id: (i % KEY_COLORS.len()) as u32,
                    x: self.rng.gen_range(0.0..(w - ow).max(1.0)),
                    y: self.rng.gen_range(0.0..(h - oh).max(1.0)),
                    w: ow,
                    h: oh,
                    vx: self.rng.gen_range(-6.0..6.0),
                    vy: self.rng.gen_range(-4.0..4.0),
                }
            })
            .collect();
    }

    fn render(&mut self) -> RgbImage {
        let (w, h) = (self.config.width as f32, self.config.height as f32);
        let mut image = RgbImage::from_pixel(self.config.width, self.config.height, BACKGROUND);
        let jitter = self.config.jitter_px;

        for obj in self.objects.iter_mut() {
            obj.step(w, h);
        }
        for obj in &self.objects {
            let (dx, dy) = if jitter > 0.0 {
                (
                    self.rng.gen_range(-jitter..=jitter),
                    self.rng.gen_range(-jitter..=jitter),
                )
            } else {
                (0.0, 0.0)
            };
            let rect = Rect::at((obj.x + dx).round() as i32, (obj.y + dy).round() as i32)
                .of_size(obj.w.max(1.0) as u32, obj.h.max(1.0) as u32);
            draw_filled_rect_mut(&mut image, rect, Rgb(key_color(obj.class_id)));
        }
        image
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&mut self) -> Result<SourceInfo, SourceError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(SourceError::DeviceLost(
                "synthetic camera needs a non-empty frame size".to_string(),
            ));
        }
        self.spawn_objects();
        self.opened = true;
        self.next_due = Some(Instant::now());
        info!(
            "🎥 合成摄像头已打开: {}x{} @ {:.1}fps, {} 个目标",
            self.config.width, self.config.height, self.config.fps, self.config.objects
        );
        Ok(SourceInfo {
            name: "synthetic".to_string(),
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        })
    }

    fn next_frame(&mut self, deadline: Instant) -> Result<SourceImage, SourceError> {
        if !self.opened {
            return Err(SourceError::DeviceLost("camera not opened".to_string()));
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > deadline {
            std::thread::sleep(deadline.saturating_duration_since(now));
            return Err(SourceError::Timeout);
        }
        std::thread::sleep(due.saturating_duration_since(now));

        // 落后超过一个周期时重新对齐节拍, 不追帧
        let now = Instant::now();
        let next = due + self.period;
        self.next_due = Some(if next < now { now + self.period } else { next });

        Ok(SourceImage::new(self.render()))
    }

    fn close(&mut self) {
        if self.opened {
            info!("🎥 合成摄像头已关闭");
        }
        self.opened = false;
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(fps: f32) -> SyntheticCamera {
        SyntheticCamera::new(SyntheticConfig {
            width: 160,
            height: 120,
            fps,
            objects: 2,
            seed: 1,
            jitter_px: 0.0,
        })
    }

    #[test]
    fn test_not_opened_is_device_lost() {
        let mut cam = camera(30.0);
        let err = cam
            .next_frame(Instant::now() + Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, SourceError::DeviceLost(_)));
    }

    #[test]
    fn test_frames_contain_key_colors() {
        let mut cam = camera(200.0);
        let info = cam.open().unwrap();
        assert_eq!((info.width, info.height), (160, 120));
        let frame = cam
            .next_frame(Instant::now() + Duration::from_millis(200))
            .unwrap();
        let red = Rgb(key_color(0));
        assert!(frame.image.pixels().any(|p| *p == red));
        cam.close();
    }

    #[test]
    fn test_deadline_before_next_frame_times_out() {
        let mut cam = camera(1.0);
        cam.open().unwrap();
        cam.next_frame(Instant::now() + Duration::from_millis(50))
            .unwrap();
        let err = cam
            .next_frame(Instant::now() + Duration::from_millis(5))
            .unwrap_err();
        assert!(matches!(err, SourceError::Timeout));
    }

    #[test]
    fn test_same_seed_same_frames() {
        let mut a = camera(500.0);
        let mut b = camera(500.0);
        a.open().unwrap();
        b.open().unwrap();
        let deadline = Instant::now() + Duration::from_millis(200);
        let fa = a.next_frame(deadline).unwrap();
        let fb = b.next_frame(deadline).unwrap();
        assert_eq!(fa.image.as_raw(), fb.image.as_raw());
    }
}
