//! 检测结果绘制
//!
//! 在原始帧上叠加检测框与类别标签。字体从磁盘按需加载,
//! 加载失败时退化为只画框。

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::classes::class_name;
use crate::Detection;

/// 明亮配色, 按类别id取模
const PALETTE: [(u8, u8, u8); 12] = [
    (255, 0, 0),
    (0, 255, 0),
    (0, 0, 255),
    (255, 255, 0),
    (255, 0, 255),
    (0, 255, 255),
    (255, 128, 0),
    (255, 0, 128),
    (128, 255, 0),
    (0, 128, 255),
    (255, 255, 255),
    (128, 0, 255),
];

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font_path: Option<&str>) -> Self {
        let font = font_path.and_then(|path| match std::fs::read(path) {
            Ok(data) => match FontVec::try_from_vec(data) {
                Ok(font) => Some(font),
                Err(e) => {
                    log::warn!("invalid label font {}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                log::warn!("label font {} unavailable: {}", path, e);
                None
            }
        });
        Self { font }
    }

    /// 在帧上叠加检测结果
    pub fn draw(&self, frame: &mut RgbImage, detections: &[Detection]) {
        for det in detections {
            let (r, g, b) = PALETTE[det.class_id % PALETTE.len()];
            let x = det.x1.round().max(0.0) as i32;
            let y = det.y1.round().max(0.0) as i32;
            let w = det.width().round().max(1.0) as u32;
            let h = det.height().round().max(1.0) as u32;
            draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w, h), Rgb([r, g, b]));

            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", class_name(det.class_id), det.confidence);
                let text_y = (y - 14).max(0);
                draw_text_mut(
                    frame,
                    Rgb([r, g, b]),
                    x,
                    text_y,
                    PxScale::from(14.0),
                    font,
                    &label,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_without_font_marks_box_edge() {
        let annotator = Annotator::new(None);
        let mut frame = RgbImage::new(64, 64);
        let det = Detection {
            class_id: 1,
            confidence: 0.9,
            x1: 10.0,
            y1: 10.0,
            x2: 30.0,
            y2: 30.0,
        };
        annotator.draw(&mut frame, &[det]);
        // 类别1 → 绿色边框
        assert_eq!(frame.get_pixel(10, 10).0, [0, 255, 0]);
        assert_eq!(frame.get_pixel(5, 5).0, [0, 0, 0]);
    }

    #[test]
    fn test_missing_font_degrades_gracefully() {
        let annotator = Annotator::new(Some("/nonexistent/font.ttf"));
        let mut frame = RgbImage::new(16, 16);
        annotator.draw(
            &mut frame,
            &[Detection {
                class_id: 0,
                confidence: 0.5,
                x1: 2.0,
                y1: 2.0,
                x2: 10.0,
                y2: 10.0,
            }],
        );
    }
}
