//! 颜色键检测器 - 按类别颜色分割连通区域
//!
//! 与合成摄像头配套使用的确定性检测器:
//! 预处理 (缩放到推理尺寸) → 逐类别颜色掩码 → 连通域 → 映射回源图像坐标。
//! 可选的模拟推理耗时按输入面积缩放, 便于观察自适应控制。

use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbImage;

use super::detector::{DetectRequest, Detector};
use super::types::{BBox, RawDetection};
use crate::error::DetectorError;
use crate::input::Frame;

/// 类别键颜色, 下标为 class id
pub const KEY_COLORS: [[u8; 3]; 6] = [
    [220, 40, 40],  // 红
    [40, 200, 60],  // 绿
    [50, 80, 230],  // 蓝
    [230, 210, 40], // 黄
    [210, 50, 200], // 品红
    [40, 200, 210], // 青
];

pub fn key_color(class_id: u32) -> [u8; 3] {
    KEY_COLORS[class_id as usize % KEY_COLORS.len()]
}

/// 模拟耗时的参考输入尺寸
const REFERENCE_SIZE: f32 = 416.0;

pub struct ColorKeyDetector {
    /// 每通道允许的颜色偏差
    tolerance: u8,
    /// 连通域最少像素数 (推理分辨率下)
    min_pixels: usize,
    /// 参考尺寸下的模拟推理耗时
    simulated_latency: Duration,
}

impl Default for ColorKeyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorKeyDetector {
    pub fn new() -> Self {
        Self {
            tolerance: 40,
            min_pixels: 12,
            simulated_latency: Duration::ZERO,
        }
    }

    pub fn with_simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels.max(1);
        self
    }

    fn matches(&self, pixel: &[u8; 3], key: &[u8; 3]) -> bool {
        pixel
            .iter()
            .zip(key.iter())
            .all(|(&p, &k)| p.abs_diff(k) <= self.tolerance)
    }

    /// 对单个类别做连通域分割, 返回 (bbox, 像素数) 列表 (推理分辨率坐标)
    fn components(&self, image: &RgbImage, key: &[u8; 3]) -> Vec<(BBox, usize)> {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let mask: Vec<bool> = image.pixels().map(|p| self.matches(&p.0, key)).collect();
        let mut visited = vec![false; w * h];
        let mut stack = Vec::new();
        let mut found = Vec::new();

        for start in 0..w * h {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let (mut x1, mut y1, mut x2, mut y2) = (w, h, 0, 0);
            let mut count = 0usize;

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % w, idx / w);
                count += 1;
                x1 = x1.min(x);
                y1 = y1.min(y);
                x2 = x2.max(x);
                y2 = y2.max(y);

                let mut visit = |n: usize| {
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < w {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < h {
                    visit(idx + w);
                }
            }

            if count >= self.min_pixels {
                let bbox = BBox::from_xyxy(
                    x1 as f32,
                    y1 as f32,
                    (x2 + 1) as f32,
                    (y2 + 1) as f32,
                );
                found.push((bbox, count));
            }
        }
        found
    }
}

impl Detector for ColorKeyDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        request: &DetectRequest,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        let size = request.input_size;
        if size == 0 {
            return Err(DetectorError::new(frame.sequence, "input size is zero"));
        }
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::new(frame.sequence, "empty frame"));
        }

        // 预处理: 缩放到推理尺寸
        let resized = imageops::resize(&*frame.image, size, size, FilterType::Nearest);

        if !self.simulated_latency.is_zero() {
            let scale = (size as f32 / REFERENCE_SIZE).powi(2);
            std::thread::sleep(self.simulated_latency.mul_f32(scale));
        }

        // 后处理: 映射回源图像坐标
        let sx = frame.width() as f32 / size as f32;
        let sy = frame.height() as f32 / size as f32;
        let mut detections = Vec::new();
        for (class_id, key) in KEY_COLORS.iter().enumerate() {
            for (bbox, pixels) in self.components(&resized, key) {
                let fill = pixels as f32 / bbox.area().max(1.0);
                // 小目标置信度更低
                let size_factor = 1.0 - (-(pixels as f32) / 400.0).exp();
                let confidence = (fill * size_factor).clamp(0.0, 1.0);
                if confidence < request.confidence_threshold {
                    continue;
                }
                let scaled = BBox::new(
                    bbox.x * sx,
                    bbox.y * sy,
                    bbox.width * sx,
                    bbox.height * sy,
                );
                detections.push(RawDetection::new(scaled, class_id as u32, confidence));
            }
        }
        Ok(detections)
    }

    fn name(&self) -> &str {
        "color-key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::SourceImage;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn frame_with(rects: &[(u32, Rect)]) -> Frame {
        let mut image = RgbImage::from_pixel(400, 400, Rgb([20, 20, 20]));
        for (class_id, rect) in rects {
            draw_filled_rect_mut(&mut image, *rect, Rgb(key_color(*class_id)));
        }
        Frame::new(1, SourceImage::new(image))
    }

    fn request(input_size: u32) -> DetectRequest {
        DetectRequest {
            input_size,
            confidence_threshold: 0.0,
        }
    }

    #[test]
    fn test_detects_one_box_per_blob() {
        let frame = frame_with(&[
            (0, Rect::at(10, 10).of_size(100, 80)),
            (2, Rect::at(200, 200).of_size(120, 120)),
            (0, Rect::at(250, 20).of_size(60, 60)),
        ]);
        let mut detector = ColorKeyDetector::new();
        let mut dets = detector.detect(&frame, &request(400)).unwrap();
        dets.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));

        assert_eq!(dets.len(), 3);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].bbox, BBox::new(10.0, 10.0, 100.0, 80.0));
        assert_eq!(dets[1].class_id, 2);
        assert_eq!(dets[2].class_id, 0);
        assert!(dets.iter().all(|d| d.validate().is_ok()));
        assert!(dets[1].confidence > 0.9);
    }

    #[test]
    fn test_boxes_scaled_back_to_source() {
        let frame = frame_with(&[(1, Rect::at(100, 100).of_size(100, 100))]);
        let mut detector = ColorKeyDetector::new();
        let dets = detector.detect(&frame, &request(200)).unwrap();
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert!((b.x - 100.0).abs() <= 2.0);
        assert!((b.width - 100.0).abs() <= 2.0);
    }

    #[test]
    fn test_threshold_drops_small_blobs() {
        let frame = frame_with(&[(3, Rect::at(10, 10).of_size(6, 6))]);
        let mut detector = ColorKeyDetector::new();
        let all = detector.detect(&frame, &request(400)).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].confidence < 0.2);
        let strict = DetectRequest {
            input_size: 400,
            confidence_threshold: 0.5,
        };
        assert!(detector.detect(&frame, &strict).unwrap().is_empty());
    }

    #[test]
    fn test_zero_input_size_fails() {
        let frame = frame_with(&[]);
        let mut detector = ColorKeyDetector::new();
        let err = detector.detect(&frame, &request(0)).unwrap_err();
        assert_eq!(err.sequence, 1);
    }
}
