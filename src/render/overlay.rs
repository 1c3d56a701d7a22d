//! 叠加层绘制 (OverlayRenderer)
//!
//! 透明画布上绘制检测框, 标签和 FPS 角标;
//! 可选地合成到最新采集帧上。标签文字需要字体, 没有字体时只画框和标签底色。

use std::fs;
use std::path::PathBuf;

use ab_glyph::{FontArc, PxScale};
use image::{imageops, DynamicImage, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::info;

use super::palette::{track_color, BADGE_BACKGROUND, BADGE_TEXT, BOX_GREEN, LABEL_TEXT};
use crate::config::{class_name, RenderConfig};
use crate::detection::types::{DetectionSnapshot, TrackedDetection};
use crate::error::ConfigError;
use crate::input::Frame;

const TAB_PAD: u32 = 3;

pub struct OverlayRenderer {
    config: RenderConfig,
    class_names: Vec<String>,
    font: Option<FontArc>,
    width: u32,
    height: u32,
}

impl OverlayRenderer {
    /// `width`/`height` 为叠加层尺寸 (与采集帧一致)
    pub fn new(
        config: RenderConfig,
        class_names: Vec<String>,
        width: u32,
        height: u32,
    ) -> Result<Self, ConfigError> {
        let font = match &config.font_path {
            Some(path) => Some(load_font(path)?),
            None => None,
        };
        Ok(Self {
            config,
            class_names,
            font,
            width,
            height,
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 绘制一帧; 返回 (图像, 绘制的检测数)
    pub fn render(
        &self,
        snapshot: &DetectionSnapshot,
        base: Option<&Frame>,
        fps: Option<f32>,
    ) -> (RgbaImage, usize) {
        let mut overlay = RgbaImage::new(self.width, self.height);

        let mut drawn = 0;
        for track in snapshot
            .tracks
            .iter()
            .filter(|t| t.confidence >= self.config.display_confidence)
        {
            self.draw_track(&mut overlay, track);
            drawn += 1;
        }

        if self.config.show_fps {
            if let Some(fps) = fps {
                self.draw_badge(&mut overlay, &format!("FPS: {:.1}", fps));
            }
        }

        let image = match base.filter(|_| self.config.composite) {
            Some(frame) => {
                let mut canvas = DynamicImage::ImageRgb8((*frame.image).clone()).to_rgba8();
                imageops::overlay(&mut canvas, &overlay, 0, 0);
                canvas
            }
            None => overlay,
        };
        (image, drawn)
    }

    fn draw_track(&self, canvas: &mut RgbaImage, track: &TrackedDetection) {
        let color = if self.config.color_by_track {
            track_color(track.track_id)
        } else {
            BOX_GREEN
        };
        let b = track.bbox;
        let (x, y) = (b.x.round() as i32, b.y.round() as i32);
        let (w, h) = (b.width.round().max(1.0) as u32, b.height.round().max(1.0) as u32);

        for i in 0..self.config.box_thickness.max(1) {
            let rect = Rect::at(x - i as i32, y - i as i32).of_size(w + 2 * i, h + 2 * i);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        // 小目标不画标签
        if b.area() <= self.config.min_label_area {
            return;
        }
        let label = format!(
            "{} {:.2}",
            class_name(&self.class_names, track.class_id),
            track.confidence
        );
        let (tw, th) = self.measure(&label);
        let tab_w = tw + 2 * TAB_PAD;
        let tab_h = th + 2 * TAB_PAD;
        let tab_y = (y - tab_h as i32).max(0);
        draw_filled_rect_mut(canvas, Rect::at(x, tab_y).of_size(tab_w, tab_h), color);
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                LABEL_TEXT,
                x + TAB_PAD as i32,
                tab_y + TAB_PAD as i32,
                self.scale(),
                font,
                &label,
            );
        }
    }

    fn draw_badge(&self, canvas: &mut RgbaImage, text: &str) {
        let (tw, th) = self.measure(text);
        let rect = Rect::at(8, 8).of_size(tw + 2 * TAB_PAD, th + 2 * TAB_PAD);
        draw_filled_rect_mut(canvas, rect, BADGE_BACKGROUND);
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                BADGE_TEXT,
                8 + TAB_PAD as i32,
                8 + TAB_PAD as i32,
                self.scale(),
                font,
                text,
            );
        }
    }

    fn scale(&self) -> PxScale {
        PxScale::from(self.config.label_scale)
    }

    /// 文字尺寸; 无字体时按等宽估算
    fn measure(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(self.scale(), font, text);
                (w.max(1), h.max(1))
            }
            None => {
                let scale = self.config.label_scale.max(1.0);
                let w = (text.chars().count() as f32 * scale * 0.6).ceil() as u32;
                (w.max(1), scale.ceil() as u32)
            }
        }
    }
}

fn load_font(path: &str) -> Result<FontArc, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    let font = FontArc::try_from_vec(bytes)
        .map_err(|_| ConfigError::Invalid(format!("{} is not a TTF/OTF font", path)))?;
    info!("🔤 已加载标签字体: {}", path);
    Ok(font)
}
