// 该文件是 Tianshu （天枢） 项目的一部分。
// src/postprocess/segment.rs - YOLO 实例分割输出解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, Contour, find_contours};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, s};
use tracing::{debug, info, warn};

use super::{ClassTable, DecodeParams, Proposal, ProposalTensor, ResizeMode, rank_and_suppress, tensor_data};
use crate::{
  preprocess::InputTransform,
  result::{Mask, Point},
  status::EngineError,
};

/// 掩膜二值化时在检测框外额外保留的像素
const MASK_BOX_MARGIN: f32 = 20.0;

/// 解码分割输出：`outputs[0]` 为 `[1, 4 + 类别数 + nm, N]`，`outputs[1]` 为 `[1, nm, mh, mw]`
pub fn decode_segments(
  outputs: &[ArrayD<f32>],
  classes: &ClassTable,
  params: &DecodeParams,
) -> Result<Vec<Mask>, EngineError> {
  if classes.is_empty() {
    info!("类别配置为空，跳过解码");
    return Err(EngineError::input_invalid("类别配置为空"));
  }
  let [boxes, protos, ..] = outputs else {
    return Err(EngineError::output_invalid(format!(
      "分割模型需要两个输出，实际为 {}",
      outputs.len()
    )));
  };
  let num_classes = classes.len();

  let basis = MaskBasis::new(protos)?;
  let (data, shape) = tensor_data(boxes);
  let tensor = ProposalTensor::new(&data, &shape, num_classes)?;
  let num_coeffs = tensor.channels() - 4 - num_classes;
  if num_coeffs != basis.num_coeffs() {
    return Err(EngineError::output_invalid(format!(
      "掩膜系数数量 {} 与原型数量 {} 不一致",
      num_coeffs,
      basis.num_coeffs()
    )));
  }

  let transform = ResizeMode::Letterbox.transform(params.image_size, params.input_size);
  let proposals = tensor.collect(
    num_classes,
    num_coeffs,
    params.thresholds.conf,
    &transform,
    None,
  );
  if proposals.is_empty() {
    info!("未检测到目标");
    return Err(EngineError::output_invalid("未检测到目标"));
  }
  let kept = rank_and_suppress(proposals, params.thresholds.iou);

  let mut masks = Vec::with_capacity(kept.len());
  for (index, proposal) in kept.iter().enumerate() {
    let binary = basis.binary_mask(proposal, params.image_size);
    let Some(points) = largest_external_contour(&binary) else {
      warn!("第 {} 个目标未找到轮廓", index);
      continue;
    };
    masks.push(Mask {
      points,
      score: proposal.score,
      class_id: proposal.class_id,
      class_name: classes.name(proposal.class_id),
    });
  }

  if masks.is_empty() {
    info!("未得到有效掩膜");
    return Err(EngineError::output_invalid("未得到有效掩膜"));
  }
  debug!("得到 {} 个掩膜", masks.len());
  Ok(masks)
}

/// 掩膜原型，`[nm, mh * mw]`
struct MaskBasis {
  protos: Array2<f32>,
  mask_w: usize,
  mask_h: usize,
}

impl MaskBasis {
  fn new(protos: &ArrayD<f32>) -> Result<Self, EngineError> {
    let (nm, mh, mw) = match protos.shape() {
      [1, nm, mh, mw] => (*nm, *mh, *mw),
      [nm, mh, mw] => (*nm, *mh, *mw),
      other => {
        return Err(EngineError::output_invalid(format!(
          "掩膜原型形状不支持: {:?}",
          other
        )));
      }
    };
    if nm == 0 || mh == 0 || mw == 0 {
      return Err(EngineError::output_invalid("掩膜原型为空"));
    }
    let (data, _) = tensor_data(protos);
    let protos = Array2::from_shape_vec((nm, mh * mw), data)
      .map_err(|e| EngineError::output_invalid(format!("掩膜原型形状错误: {}", e)))?;
    Ok(Self {
      protos,
      mask_w: mw,
      mask_h: mh,
    })
  }

  fn num_coeffs(&self) -> usize {
    self.protos.nrows()
  }

  /// 掩膜分辨率下 letterbox 有效区域 (top, bottom, left, right)
  fn content_region(&self, image_size: (u32, u32)) -> (usize, usize, usize, usize) {
    let (mw, mh) = (self.mask_w as u32, self.mask_h as u32);
    let t = InputTransform::letterbox(image_size.0, image_size.1, mw, mh);
    let dw = (mw - t.resized_width) as f32 / 2.0;
    let dh = (mh - t.resized_height) as f32 / 2.0;
    let top = (dh - 0.1).round().max(0.0) as usize;
    let left = (dw - 0.1).round().max(0.0) as usize;
    let bottom = ((mh as f32 - dh + 0.1).round() as usize).clamp(top + 1, self.mask_h);
    let right = ((mw as f32 - dw + 0.1).round() as usize).clamp(left + 1, self.mask_w);
    (top, bottom, left, right)
  }

  /// 系数与原型相乘得到掩膜，裁掉填充后放大到原图，并限制在扩展后的检测框内
  fn binary_mask(&self, proposal: &Proposal, image_size: (u32, u32)) -> GrayImage {
    let coeffs = Array1::from_vec(proposal.coeffs.clone());
    let logits = coeffs.dot(&self.protos);
    let (img_w, img_h) = image_size;
    let mut binary = GrayImage::new(img_w, img_h);

    let Ok(logits) = logits.into_shape_with_order((self.mask_h, self.mask_w)) else {
      return binary;
    };
    let (top, bottom, left, right) = self.content_region(image_size);
    let content = logits.slice(s![top..bottom, left..right]);
    let resized = resize_bilinear(content, img_w as usize, img_h as usize);

    let [x_min, y_min, x_max, y_max] = proposal.bbox;
    for (row, line) in resized.outer_iter().enumerate() {
      let r = row as f32;
      if r <= y_min - MASK_BOX_MARGIN || r >= y_max + MASK_BOX_MARGIN {
        continue;
      }
      for (col, value) in line.iter().enumerate() {
        let c = col as f32;
        if c > x_min - MASK_BOX_MARGIN && c < x_max + MASK_BOX_MARGIN && *value > 0.0 {
          binary.put_pixel(col as u32, row as u32, Luma([255]));
        }
      }
    }
    binary
  }
}

/// 双线性插值缩放，像素中心对齐
fn resize_bilinear(src: ArrayView2<f32>, out_w: usize, out_h: usize) -> Array2<f32> {
  let (src_h, src_w) = src.dim();
  let scale_x = src_w as f32 / out_w as f32;
  let scale_y = src_h as f32 / out_h as f32;

  let sample_axis = |dst: usize, scale: f32, len: usize| -> (usize, usize, f32) {
    let pos = ((dst as f32 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (pos.floor() as usize).min(len - 1);
    let i1 = (i0 + 1).min(len - 1);
    (i0, i1, pos - i0 as f32)
  };
  let columns: Vec<(usize, usize, f32)> = (0..out_w).map(|x| sample_axis(x, scale_x, src_w)).collect();

  let mut out = Array2::<f32>::zeros((out_h, out_w));
  for y in 0..out_h {
    let (y0, y1, fy) = sample_axis(y, scale_y, src_h);
    for (x, &(x0, x1, fx)) in columns.iter().enumerate() {
      let top = src[[y0, x0]] * (1.0 - fx) + src[[y0, x1]] * fx;
      let bottom = src[[y1, x0]] * (1.0 - fx) + src[[y1, x1]] * fx;
      out[[y, x]] = top * (1.0 - fy) + bottom * fy;
    }
  }
  out
}

/// 去掉与前后点方向相同的中间点，只保留折点
fn compress_chain(points: &[Point]) -> Vec<Point> {
  let n = points.len();
  if n < 3 {
    return points.to_vec();
  }
  let direction = |a: Point, b: Point| ((b.x - a.x).signum(), (b.y - a.y).signum());
  points
    .iter()
    .enumerate()
    .filter(|&(i, &p)| {
      let prev = points[(i + n - 1) % n];
      let next = points[(i + 1) % n];
      direction(prev, p) != direction(p, next)
    })
    .map(|(_, &p)| p)
    .collect()
}

/// 最外层轮廓中边界点最多的一个，压缩后返回
fn largest_external_contour(binary: &GrayImage) -> Option<Vec<Point>> {
  let contours = find_contours::<i32>(binary);
  let largest = contours
    .iter()
    .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    .fold(None, |best: Option<&Contour<i32>>, c| match best {
      Some(b) if b.points.len() >= c.points.len() => Some(b),
      _ => Some(c),
    })?;
  let points: Vec<Point> = largest.points.iter().map(|p| Point { x: p.x, y: p.y }).collect();
  let points = compress_chain(&points);
  (!points.is_empty()).then_some(points)
}
