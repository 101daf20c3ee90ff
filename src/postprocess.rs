// 该文件是 Tianshu （天枢） 项目的一部分。
// src/postprocess.rs - 模型输出后处理
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

use std::collections::BTreeMap;

use ndarray::ArrayD;
use tracing::debug;

use crate::{
  preprocess::InputTransform,
  request::Thresholds,
  status::EngineError,
};

pub mod detect;
pub mod nms;
pub mod segment;

pub use self::{
  detect::decode_detections,
  nms::{iou, non_max_suppression, sort_by_score},
  segment::decode_segments,
};

/// 候选框，坐标为原图空间的 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
  pub bbox: [f32; 4],
  pub class_id: u32,
  pub score: f32,
  /// 分割掩膜系数，检测任务为空
  pub coeffs: Vec<f32>,
}

/// 类别编号到名称的映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassTable {
  names: BTreeMap<u32, String>,
}

impl ClassTable {
  /// 由 `id_cfgs` 构造，键必须是十进制类别编号
  pub fn from_id_cfgs(id_cfgs: &BTreeMap<String, String>) -> Result<Self, EngineError> {
    let mut names = BTreeMap::new();
    for (key, name) in id_cfgs {
      let id = key
        .trim()
        .parse::<u32>()
        .map_err(|_| EngineError::input_invalid(format!("类别编号无效: {}", key)))?;
      names.insert(id, name.clone());
    }
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> String {
    self
      .names
      .get(&class_id)
      .cloned()
      .unwrap_or_else(|| class_id.to_string())
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for ClassTable {
  fn from_iter<T: IntoIterator<Item = (u32, S)>>(iter: T) -> Self {
    Self {
      names: iter.into_iter().map(|(id, name)| (id, name.into())).collect(),
    }
  }
}

/// 解码时对输入几何的假设，必须与预处理一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
  Direct,
  Letterbox,
}

impl ResizeMode {
  pub fn transform(self, image_size: (u32, u32), input_size: (u32, u32)) -> InputTransform {
    let ((img_w, img_h), (in_w, in_h)) = (image_size, input_size);
    match self {
      ResizeMode::Direct => InputTransform::direct(img_w, img_h, in_w, in_h),
      ResizeMode::Letterbox => InputTransform::letterbox(img_w, img_h, in_w, in_h),
    }
  }
}

/// 一次解码所需的上下文
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
  /// 原图 (宽, 高)
  pub image_size: (u32, u32),
  /// 模型输入 (宽, 高)
  pub input_size: (u32, u32),
  pub thresholds: Thresholds,
}

/// `[1, C, N]` 形状的候选框输出
pub(crate) struct ProposalTensor<'a> {
  data: &'a [f32],
  channels: usize,
  num_proposals: usize,
}

impl<'a> ProposalTensor<'a> {
  pub(crate) fn new(data: &'a [f32], shape: &[usize], num_classes: usize) -> Result<Self, EngineError> {
    let (channels, num_proposals) = match shape {
      [1, c, n] => (*c, *n),
      [c, n] => (*c, *n),
      other => {
        return Err(EngineError::output_invalid(format!(
          "候选框输出形状不支持: {:?}",
          other
        )));
      }
    };
    if channels < 4 + num_classes {
      return Err(EngineError::output_invalid(format!(
        "输出通道数 {} 少于 4 + 类别数 {}",
        channels, num_classes
      )));
    }
    Ok(Self {
      data,
      channels,
      num_proposals,
    })
  }

  fn at(&self, channel: usize, index: usize) -> f32 {
    self.data[channel * self.num_proposals + index]
  }

  /// 逐列取最大类别分数，保留分数不低于阈值的候选框
  pub(crate) fn collect(
    &self,
    num_classes: usize,
    num_coeffs: usize,
    conf: f32,
    transform: &InputTransform,
    clip_to: Option<(u32, u32)>,
  ) -> Vec<Proposal> {
    let mut proposals = Vec::new();
    for j in 0..self.num_proposals {
      let mut max_score = self.at(4, j);
      let mut class_id = 0usize;
      for i in 1..num_classes {
        let score = self.at(4 + i, j);
        if score > max_score {
          max_score = score;
          class_id = i;
        }
      }
      if max_score.is_nan() || max_score < conf {
        continue;
      }

      let (cx, cy, bw, bh) = (self.at(0, j), self.at(1, j), self.at(2, j), self.at(3, j));
      let (mut x_min, mut y_min) = transform.to_source(cx - bw / 2.0, cy - bh / 2.0);
      let (mut x_max, mut y_max) = transform.to_source(cx + bw / 2.0, cy + bh / 2.0);
      if let Some((w, h)) = clip_to {
        x_min = x_min.max(0.0);
        y_min = y_min.max(0.0);
        x_max = x_max.min(w as f32);
        y_max = y_max.min(h as f32);
        // 完全落在填充区或图像外的框裁剪后为空
        if x_max <= x_min || y_max <= y_min {
          continue;
        }
      }

      let coeffs = (0..num_coeffs)
        .map(|k| self.at(4 + num_classes + k, j))
        .collect();
      proposals.push(Proposal {
        bbox: [x_min, y_min, x_max, y_max],
        class_id: class_id as u32,
        score: max_score,
        coeffs,
      });
    }
    debug!("候选框数量: {} / {}", proposals.len(), self.num_proposals);
    proposals
  }

  pub(crate) fn channels(&self) -> usize {
    self.channels
  }
}

/// 连续存储的张量数据与形状
pub(crate) fn tensor_data(tensor: &ArrayD<f32>) -> (Vec<f32>, Vec<usize>) {
  let shape = tensor.shape().to_vec();
  let data = tensor.as_standard_layout().iter().copied().collect();
  (data, shape)
}

/// 排序后做同类别 NMS，返回保留下来的候选框
pub(crate) fn rank_and_suppress(mut proposals: Vec<Proposal>, iou_threshold: f32) -> Vec<Proposal> {
  sort_by_score(&mut proposals);
  let picked = non_max_suppression(&proposals, iou_threshold);
  let mut slots: Vec<Option<Proposal>> = proposals.into_iter().map(Some).collect();
  picked
    .into_iter()
    .filter_map(|index| slots[index].take())
    .collect()
}
