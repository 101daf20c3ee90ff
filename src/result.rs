// 该文件是 Tianshu （天枢） 项目的一部分。
// src/result.rs - 推理结果定义
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

use serde::Serialize;

use crate::request::{SortMethod, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

/// 旋转框，(x, y) 为中心点
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotateBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub angle: f32,
  pub score: f32,
  pub class_id: u32,
  pub class_name: String,
}

impl RotateBox {
  pub fn from_corners(corners: [f32; 4], score: f32, class_id: u32, class_name: String) -> Self {
    let [x_min, y_min, x_max, y_max] = corners;
    Self {
      x: (x_min + x_max) / 2.0,
      y: (y_min + y_max) / 2.0,
      width: x_max - x_min,
      height: y_max - y_min,
      angle: 0.0,
      score,
      class_id,
      class_name,
    }
  }

  /// [x_min, y_min, x_max, y_max]
  pub fn corners(&self) -> [f32; 4] {
    [
      self.x - self.width / 2.0,
      self.y - self.height / 2.0,
      self.x + self.width / 2.0,
      self.y + self.height / 2.0,
    ]
  }

  pub fn translate(&mut self, dx: f32, dy: f32) {
    self.x += dx;
    self.y += dy;
  }
}

/// 实例掩膜，以外轮廓点序列表示
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mask {
  pub points: Vec<Point>,
  pub score: f32,
  pub class_id: u32,
  pub class_name: String,
}

impl Mask {
  pub fn translate(&mut self, dx: i32, dy: i32) {
    for point in self.points.iter_mut() {
      point.x += dx;
      point.y += dy;
    }
  }

  /// 轮廓点的均值，用作排序参考
  pub fn centroid(&self) -> (f32, f32) {
    if self.points.is_empty() {
      return (0.0, 0.0);
    }
    let n = self.points.len() as f32;
    let (sx, sy) = self
      .points
      .iter()
      .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x as f32, sy + p.y as f32));
    (sx / n, sy / n)
  }
}

/// 单个 ROI 在执行过程中累积的结果，坐标位于裁剪图空间
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
  Boxes(Vec<RotateBox>),
  Masks(Vec<Mask>),
}

impl TaskOutput {
  pub fn empty(task: TaskKind) -> Self {
    match task {
      TaskKind::Detect => TaskOutput::Boxes(Vec::new()),
      TaskKind::Segment => TaskOutput::Masks(Vec::new()),
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TaskOutput::Boxes(b) => b.len(),
      TaskOutput::Masks(m) => m.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 追加同类结果，类别不一致时返回 false 且不修改
  pub fn extend(&mut self, other: TaskOutput) -> bool {
    match (self, other) {
      (TaskOutput::Boxes(ours), TaskOutput::Boxes(theirs)) => ours.extend(theirs),
      (TaskOutput::Masks(ours), TaskOutput::Masks(theirs)) => ours.extend(theirs),
      _ => return false,
    }
    true
  }

  pub fn sort_by(&mut self, method: SortMethod) {
    let TaskOutput::Boxes(boxes) = self else {
      return;
    };
    match method {
      SortMethod::Unsorted => {}
      SortMethod::XDescending => boxes.sort_by(|a, b| b.x.total_cmp(&a.x)),
      SortMethod::YDescending => boxes.sort_by(|a, b| b.y.total_cmp(&a.y)),
    }
  }

  pub fn truncate(&mut self, max_num: usize) {
    match self {
      TaskOutput::Boxes(b) => b.truncate(max_num),
      TaskOutput::Masks(m) => m.truncate(max_num),
    }
  }

  pub fn translate(&mut self, dx: i32, dy: i32) {
    match self {
      TaskOutput::Boxes(boxes) => boxes
        .iter_mut()
        .for_each(|b| b.translate(dx as f32, dy as f32)),
      TaskOutput::Masks(masks) => masks.iter_mut().for_each(|m| m.translate(dx, dy)),
    }
  }
}

/// 整次调用的结果，每个请求 ROI 对应一个槽位
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "task", content = "slots", rename_all = "lowercase")]
pub enum InferResult {
  Detect(Vec<Vec<RotateBox>>),
  Segment(Vec<Vec<Mask>>),
}

impl InferResult {
  pub fn with_slots(task: TaskKind, slots: usize) -> Self {
    match task {
      TaskKind::Detect => InferResult::Detect(vec![Vec::new(); slots]),
      TaskKind::Segment => InferResult::Segment(vec![Vec::new(); slots]),
    }
  }

  pub fn slot_count(&self) -> usize {
    match self {
      InferResult::Detect(s) => s.len(),
      InferResult::Segment(s) => s.len(),
    }
  }

  pub fn slot_len(&self, index: usize) -> usize {
    match self {
      InferResult::Detect(s) => s.get(index).map_or(0, Vec::len),
      InferResult::Segment(s) => s.get(index).map_or(0, Vec::len),
    }
  }

  /// 把一个 ROI 的输出写入对应槽位，类型不匹配时忽略
  pub fn fill_slot(&mut self, index: usize, output: TaskOutput) {
    match (self, output) {
      (InferResult::Detect(slots), TaskOutput::Boxes(boxes)) => {
        if let Some(slot) = slots.get_mut(index) {
          *slot = boxes;
        }
      }
      (InferResult::Segment(slots), TaskOutput::Masks(masks)) => {
        if let Some(slot) = slots.get_mut(index) {
          *slot = masks;
        }
      }
      _ => {}
    }
  }

  pub fn boxes(&self) -> Option<&[Vec<RotateBox>]> {
    match self {
      InferResult::Detect(s) => Some(s),
      InferResult::Segment(_) => None,
    }
  }

  pub fn masks(&self) -> Option<&[Vec<Mask>]> {
    match self {
      InferResult::Segment(s) => Some(s),
      InferResult::Detect(_) => None,
    }
  }
}
