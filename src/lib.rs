// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotate; // 检测框绘制
pub mod capture; // 摄像头采集
pub mod classes; // COCO类别名
pub mod config; // 引擎配置参数
pub mod engine; // 引擎生命周期与采集推理循环
pub mod letterbox; // Letterbox预处理
pub mod ort_backend; // ONNX Runtime推理后端
pub mod postprocess; // DFL解码与多尺度融合
pub mod publisher; // UDP检测结果推送

pub use crate::capture::FrameSource;
pub use crate::config::EngineConfig;
pub use crate::engine::{DetectionEngine, EngineParts, EngineState};
pub use crate::letterbox::{Letterbox, LetterboxResult};
pub use crate::ort_backend::{InferenceBackend, OrtBackend};
pub use crate::postprocess::Candidates;
pub use crate::publisher::{DetectionBatch, DetectionRecord, ResultPublisher};

/// 检测结果 (源图像素坐标系, 构造后不再修改)
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// 贪心NMS (跨类别, 与检测器训练配置一致)
///
/// 输入为还原到源图坐标的框与对应分数, 返回保留框的原始下标,
/// 按分数从高到低排列。排序稳定: 分数相同时保持原始下标顺序。
pub fn non_max_suppression(boxes: &[[f32; 4]], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut removed = vec![false; boxes.len()];
    for (rank, &i) in order.iter().enumerate() {
        if removed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[rank + 1..] {
            if !removed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                removed[j] = true;
            }
        }
    }
    keep
}

/// 重叠宽高加 1e-5, 避免零面积框的退化情况
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    const EPS: f32 = 1e-5;
    let xx1 = a[0].max(b[0]);
    let yy1 = a[1].max(b[1]);
    let xx2 = a[2].min(b[2]);
    let yy2 = a[3].min(b[3]);
    let w = (xx2 - xx1 + EPS).max(0.0);
    let h = (yy2 - yy1 + EPS).max(0.0);
    let inter = w * h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let boxes = [[0.0, 0.0, 10.0, 10.0], [20.0, 20.0, 30.0, 30.0]];
        let scores = [0.9, 0.8];
        let keep = non_max_suppression(&boxes, &scores, 0.45);
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn test_nms_suppresses_overlapping_box() {
        // IoU = 81/119 ≈ 0.68 > 0.45, 低分框被抑制
        let boxes = [[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 11.0, 11.0]];
        let scores = [0.9, 0.8];
        let keep = non_max_suppression(&boxes, &scores, 0.45);
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn test_nms_cross_class_by_design() {
        // 不按类别分组: 不同类别的重叠框互相抑制
        let boxes = [[0.0, 0.0, 10.0, 10.0], [0.5, 0.5, 10.5, 10.5]];
        let scores = [0.6, 0.9];
        let keep = non_max_suppression(&boxes, &scores, 0.45);
        assert_eq!(keep, vec![1]);
    }

    #[test]
    fn test_nms_tie_broken_by_original_index() {
        let boxes = [
            [0.0, 0.0, 10.0, 10.0],
            [100.0, 100.0, 110.0, 110.0],
            [0.0, 0.0, 10.0, 10.0],
        ];
        let scores = [0.5, 0.5, 0.5];
        let keep = non_max_suppression(&boxes, &scores, 0.45);
        assert_eq!(keep, vec![0, 1]);
    }

    #[test]
    fn test_nms_idempotent() {
        let boxes = [
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 11.0, 11.0],
            [50.0, 50.0, 60.0, 60.0],
            [52.0, 52.0, 62.0, 62.0],
            [200.0, 200.0, 210.0, 210.0],
        ];
        let scores = [0.9, 0.8, 0.7, 0.95, 0.3];
        let keep = non_max_suppression(&boxes, &scores, 0.45);

        let kept_boxes: Vec<[f32; 4]> = keep.iter().map(|&i| boxes[i]).collect();
        let kept_scores: Vec<f32> = keep.iter().map(|&i| scores[i]).collect();
        let keep_again = non_max_suppression(&kept_boxes, &kept_scores, 0.45);
        assert_eq!(keep_again, (0..kept_boxes.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_iou_degenerate_zero_area() {
        // 零面积框不应产生NaN
        let a = [5.0, 5.0, 5.0, 5.0];
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!(iou(&a, &b).is_finite());
    }
}
