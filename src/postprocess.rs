// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// DFL解码与多尺度融合
// 检测头为anchor-free多分支导出: 每个尺度输出
// box分布张量 [1, 4*bins, h, w] + 类别置信度张量 [1, classes, h, w]

use anyhow::{bail, Result};
use ndarray::{s, ArrayD};

/// 融合后的候选框集合
///
/// 三个数组按anchor位置一一对应: 第n个框、第n个类别、第n个分数
/// 指向同一个anchor。该对齐关系贯穿展平与拼接的每一步。
#[derive(Debug, Default)]
pub struct Candidates {
    /// 模型输入像素坐标系的 [x1, y1, x2, y2]
    pub boxes: Vec<[f32; 4]>,
    pub class_ids: Vec<usize>,
    pub scores: Vec<f32>,
}

impl Candidates {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// 数值稳定softmax: 先减去最大值再取指数
pub fn softmax(x: &[f32]) -> Vec<f32> {
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = x.iter().map(|&v| (v - max_val).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// DFL解码: 分布概率的期望bin下标即连续坐标偏移
pub fn dfl_expectation(probs: &[f32]) -> f32 {
    probs
        .iter()
        .enumerate()
        .map(|(i, &p)| i as f32 * p)
        .sum()
}

/// 解码单尺度box分布张量 → 每个anchor的 [x1,y1,x2,y2] (模型输入像素坐标)
///
/// stride 由输入尺寸与网格分辨率推导, 对任意网格分辨率通用。
/// 展平顺序为空间行优先 (先h后w), 与 flatten_branch_scores 保持一致。
pub fn decode_branch_boxes(box_pred: &ArrayD<f32>, input_size: u32) -> Result<Vec<[f32; 4]>> {
    let shape = box_pred.shape().to_vec();
    if shape.len() != 4 || shape[0] != 1 || shape[1] % 4 != 0 || shape[1] == 0 {
        bail!("unexpected box tensor shape {:?}", shape);
    }
    let bins = shape[1] / 4;
    let (grid_h, grid_w) = (shape[2], shape[3]);
    let stride_y = input_size as f32 / grid_h as f32;
    let stride_x = input_size as f32 / grid_w as f32;

    let mut out = Vec::with_capacity(grid_h * grid_w);
    for row in 0..grid_h {
        for col in 0..grid_w {
            // 4条边 (left, top, right, bottom) 各自一组bin分布
            let mut dist = [0.0f32; 4];
            for (side, d) in dist.iter_mut().enumerate() {
                let logits: Vec<f32> = box_pred
                    .slice(s![0, side * bins..(side + 1) * bins, row, col])
                    .iter()
                    .cloned()
                    .collect();
                *d = dfl_expectation(&softmax(&logits));
            }
            let cx = col as f32 + 0.5;
            let cy = row as f32 + 0.5;
            out.push([
                (cx - dist[0]) * stride_x,
                (cy - dist[1]) * stride_y,
                (cx + dist[2]) * stride_x,
                (cy + dist[3]) * stride_y,
            ]);
        }
    }
    Ok(out)
}

/// 展平单尺度类别置信度张量 → 每个anchor的 (最优类别, 最优分数)
///
/// 分数并列时取下标最小的类别。
fn flatten_branch_scores(cls_pred: &ArrayD<f32>) -> Result<Vec<(usize, f32)>> {
    let shape = cls_pred.shape().to_vec();
    if shape.len() != 4 || shape[0] != 1 || shape[1] == 0 {
        bail!("unexpected class tensor shape {:?}", shape);
    }
    let classes = shape[1];
    let (grid_h, grid_w) = (shape[2], shape[3]);

    let mut out = Vec::with_capacity(grid_h * grid_w);
    for row in 0..grid_h {
        for col in 0..grid_w {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let v = cls_pred[[0, c, row, col]];
                if v > best.1 {
                    best = (c, v);
                }
            }
            out.push(best);
        }
    }
    Ok(out)
}

/// 解码三个检测尺度的原始输出并融合为平铺候选集
///
/// 输出布局与多分支导出一致: outputs.len() 必须能被3整除,
/// 第i个分支的box分布张量在 per_branch*i, 类别张量在 per_branch*i+1,
/// 分支按模型输出顺序拼接。只保留最优类别分数达到阈值的anchor。
pub fn decode_outputs(
    outputs: &[ArrayD<f32>],
    input_size: u32,
    conf_threshold: f32,
) -> Result<Candidates> {
    if outputs.is_empty() || outputs.len() % 3 != 0 {
        bail!(
            "expected 3 detection branches, got {} output tensors",
            outputs.len()
        );
    }
    let per_branch = outputs.len() / 3;
    if per_branch < 2 {
        bail!("each branch needs a box and a class tensor");
    }

    let mut cands = Candidates::default();
    for i in 0..3 {
        let boxes = decode_branch_boxes(&outputs[per_branch * i], input_size)?;
        let scores = flatten_branch_scores(&outputs[per_branch * i + 1])?;
        if boxes.len() != scores.len() {
            bail!(
                "branch {} anchor mismatch: {} boxes vs {} score rows",
                i,
                boxes.len(),
                scores.len()
            );
        }
        for (b, (class_id, score)) in boxes.into_iter().zip(scores) {
            if score >= conf_threshold {
                cands.boxes.push(b);
                cands.class_ids.push(class_id);
                cands.scores.push(score);
            }
        }
    }
    Ok(cands)
}
