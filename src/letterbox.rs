//! Letterbox预处理
//!
//! 保持宽高比缩放到模型输入正方形, 周围用黑色填充,
//! 并记录缩放比与填充偏移, 供检测框无损映射回源图坐标。

use anyhow::{bail, Result};
use image::{imageops, RgbImage};
use ndarray::{Array, IxDyn};

/// Letterbox变换结果 (单次推理周期内使用)
pub struct LetterboxResult {
    /// 缩放+填充后的正方形图像
    pub image: RgbImage,
    /// 源图 → 模型输入的缩放比
    pub ratio: f32,
    /// 左侧填充像素
    pub pad_x: u32,
    /// 顶部填充像素
    pub pad_y: u32,
    pub src_width: u32,
    pub src_height: u32,
}

/// Letterbox预处理器
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    target: u32,
}

impl Letterbox {
    pub fn new(target: u32) -> Self {
        Self { target }
    }

    /// 缩放并居中填充到 target×target
    pub fn apply(&self, frame: &RgbImage) -> Result<LetterboxResult> {
        let (w0, h0) = frame.dimensions();
        if w0 == 0 || h0 == 0 {
            bail!("empty frame ({}x{})", w0, h0);
        }

        let ratio = (self.target as f32 / w0 as f32).min(self.target as f32 / h0 as f32);
        let new_w = ((w0 as f32 * ratio).round() as u32).clamp(1, self.target);
        let new_h = ((h0 as f32 * ratio).round() as u32).clamp(1, self.target);
        let pad_x = (self.target - new_w) / 2;
        let pad_y = (self.target - new_h) / 2;

        let resized = imageops::resize(frame, new_w, new_h, imageops::FilterType::Triangle);
        // RgbImage::new 初始化为全零, 即黑色填充
        let mut canvas = RgbImage::new(self.target, self.target);
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        Ok(LetterboxResult {
            image: canvas,
            ratio,
            pad_x,
            pad_y,
            src_width: w0,
            src_height: h0,
        })
    }
}

impl LetterboxResult {
    /// 把模型输入坐标系的框映射回源图坐标 (截断到图像边界)
    pub fn restore_box(&self, b: [f32; 4]) -> [f32; 4] {
        let w0 = self.src_width as f32;
        let h0 = self.src_height as f32;
        [
            ((b[0] - self.pad_x as f32) / self.ratio).clamp(0.0, w0),
            ((b[1] - self.pad_y as f32) / self.ratio).clamp(0.0, h0),
            ((b[2] - self.pad_x as f32) / self.ratio).clamp(0.0, w0),
            ((b[3] - self.pad_y as f32) / self.ratio).clamp(0.0, h0),
        ]
    }

    /// 转换为模型输入张量 NCHW [1,3,S,S], 像素归一化到 [0,1]
    pub fn to_tensor(&self) -> Array<f32, IxDyn> {
        let s = self.image.width() as usize;
        let mut xs = Array::zeros((1, 3, s, s)).into_dyn();
        for (x, y, pix) in self.image.enumerate_pixels() {
            let [r, g, b] = pix.0;
            xs[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
            xs[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
            xs[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
        }
        xs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_640x480() {
        let frame = RgbImage::new(640, 480);
        let lb = Letterbox::new(640).apply(&frame).unwrap();
        assert_eq!(lb.image.dimensions(), (640, 640));
        assert!((lb.ratio - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
    }

    #[test]
    fn test_letterbox_rejects_empty_frame() {
        let frame = RgbImage::new(0, 0);
        assert!(Letterbox::new(640).apply(&frame).is_err());
    }

    #[test]
    fn test_restore_box_inverts_transform() {
        let frame = RgbImage::new(320, 240);
        let lb = Letterbox::new(640).apply(&frame).unwrap();
        // ratio = 2.0, pad_y = (640-480)/2 = 80
        let restored = lb.restore_box([20.0, 100.0, 620.0, 560.0]);
        assert_eq!(restored, [10.0, 10.0, 310.0, 240.0]);
    }

    #[test]
    fn test_restore_box_clamps_to_source_bounds() {
        let frame = RgbImage::new(640, 480);
        let lb = Letterbox::new(640).apply(&frame).unwrap();
        let restored = lb.restore_box([-20.0, 0.0, 10_000.0, 700.0]);
        assert_eq!(restored, [0.0, 0.0, 640.0, 480.0]);
    }

    #[test]
    fn test_to_tensor_normalizes_pixels() {
        let mut frame = RgbImage::new(4, 4);
        frame.put_pixel(1, 2, image::Rgb([255, 128, 0]));
        let lb = Letterbox::new(4).apply(&frame).unwrap();
        let xs = lb.to_tensor();
        assert_eq!(xs.shape(), &[1, 3, 4, 4]);
        assert!((xs[[0, 0, 2, 1]] - 1.0).abs() < 1e-6);
        assert!((xs[[0, 1, 2, 1]] - 128.0 / 255.0).abs() < 1e-6);
        assert!((xs[[0, 2, 2, 1]]).abs() < 1e-6);
    }
}
