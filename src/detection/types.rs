/// 检测系统数据结构定义
/// Data structures shared by inference, smoothing and rendering
use std::time::Instant;

// ========== 数据结构 ==========

/// 检测框 (源图像像素坐标, 左上角 + 宽高)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// 中心点欧氏距离
    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// 计算两个边界框的IOU (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.xmax().min(other.xmax());
        let y2 = self.ymax().min(other.ymax());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// 指数平滑: alpha * self + (1 - alpha) * other (逐坐标)
    pub fn blend(&self, other: &BBox, alpha: f32) -> BBox {
        let mix = |a: f32, b: f32| alpha * a + (1.0 - alpha) * b;
        BBox {
            x: mix(self.x, other.x),
            y: mix(self.y, other.y),
            width: mix(self.width, other.width),
            height: mix(self.height, other.height),
        }
    }

    /// 坐标有限且宽高非负
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }
}

/// 检测器输出的单个目标
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub class_id: u32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: BBox, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    /// 检查检测结果是否合法 (非法属于程序缺陷)
    pub fn validate(&self) -> Result<(), String> {
        if !self.bbox.is_well_formed() {
            return Err(format!("malformed box {:?}", self.bbox));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        Ok(())
    }
}

/// 单帧检测结果, 以帧序号标记
#[derive(Clone, Debug)]
pub struct RawDetectionSet {
    pub sequence: u64,
    pub timestamp: Instant,
    pub detections: Vec<RawDetection>,
}

/// 跟踪对象 (平滑后的检测)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedDetection {
    /// 唯一跟踪ID
    pub track_id: u64,
    pub class_id: u32,
    /// 指数平滑后的边界框
    pub bbox: BBox,
    /// 指数平滑后的置信度
    pub confidence: f32,
    /// 连续未匹配帧数 (匹配时归零)
    pub age: u32,
    /// 累计匹配次数
    pub hits: u32,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl TrackedDetection {
    pub(crate) fn spawn(track_id: u64, detection: &RawDetection, sequence: u64) -> Self {
        Self {
            track_id,
            class_id: detection.class_id,
            bbox: detection.bbox,
            confidence: detection.confidence,
            age: 0,
            hits: 1,
            first_seen: sequence,
            last_seen: sequence,
        }
    }

    /// 融合匹配到的新检测
    pub(crate) fn absorb(&mut self, detection: &RawDetection, alpha: f32, sequence: u64) {
        self.bbox = self.bbox.blend(&detection.bbox, alpha);
        self.confidence = alpha * self.confidence + (1.0 - alpha) * detection.confidence;
        self.age = 0;
        self.hits = self.hits.saturating_add(1);
        self.last_seen = sequence;
    }
}

/// 发布给渲染线程的不可变快照
#[derive(Clone, Debug, Default)]
pub struct DetectionSnapshot {
    /// 产生此快照的帧序号 (0 表示尚无检测)
    pub sequence: u64,
    pub timestamp: Option<Instant>,
    pub tracks: Vec<TrackedDetection>,
}

impl DetectionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_distance() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(3.0, 4.0, 10.0, 10.0);
        assert!((a.center_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let b = BBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let c = BBox::new(20.0, 20.0, 5.0, 5.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_blend() {
        let prev = BBox::new(0.0, 0.0, 10.0, 10.0);
        let raw = BBox::new(10.0, 0.0, 10.0, 10.0);
        let out = prev.blend(&raw, 0.8);
        assert!((out.x - 2.0).abs() < 1e-4);
        assert_eq!(out.y, 0.0);
        assert!((out.width - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let ok = RawDetection::new(BBox::new(1.0, 1.0, 2.0, 2.0), 0, 0.5);
        assert!(ok.validate().is_ok());
        let nan = RawDetection::new(BBox::new(f32::NAN, 1.0, 2.0, 2.0), 0, 0.5);
        assert!(nan.validate().is_err());
        let negative = RawDetection::new(BBox::new(1.0, 1.0, -2.0, 2.0), 0, 0.5);
        assert!(negative.validate().is_err());
        let conf = RawDetection::new(BBox::new(1.0, 1.0, 2.0, 2.0), 0, 1.5);
        assert!(conf.validate().is_err());
    }
}
