//! 轨迹配色

use image::Rgba;

/// 默认框颜色 (绿色)
pub const BOX_GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const LABEL_TEXT: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const BADGE_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 160]);
pub const BADGE_TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 根据ID生成不同颜色
pub fn track_color(track_id: u64) -> Rgba<u8> {
    let hue = (track_id as f32 * 137.508) % 360.0; // 黄金角度采样
    let (r, g, b) = hsv_to_rgb(hue, 0.8, 0.9);
    Rgba([r, g, b, 255])
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}
