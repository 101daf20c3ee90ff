// 该文件是 Tianshu （天枢） 项目的一部分。
// src/request.rs - 推理请求配置
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

use std::{collections::BTreeMap, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::status::EngineError;

const DEFAULT_CONF: f32 = 0.3;
const DEFAULT_IOU: f32 = 0.3;
const DEFAULT_MAX_NUM: i32 = -1;

/// 任务类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
  Detect,
  Segment,
}

impl FromStr for TaskKind {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "detect" | "detection" => Ok(TaskKind::Detect),
      "segment" | "segmentation" => Ok(TaskKind::Segment),
      other => Err(EngineError::input_invalid(format!("未知任务类别: {}", other))),
    }
  }
}

impl std::fmt::Display for TaskKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TaskKind::Detect => write!(f, "detect"),
      TaskKind::Segment => write!(f, "segment"),
    }
  }
}

/// 感兴趣区域，(x, y) 为中心点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
  #[serde(default)]
  pub angle: f32,
}

/// ROI 在原图中的轴对齐矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiRect {
  pub left: u32,
  pub top: u32,
  pub width: u32,
  pub height: u32,
}

impl Roi {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
      angle: 0.0,
    }
  }

  /// 覆盖整张图像的 ROI
  pub fn full_image(width: u32, height: u32) -> Self {
    let (w, h) = (width as i32, height as i32);
    Self::new(w / 2, h / 2, w, h)
  }

  /// 由左上角坐标构造
  pub fn from_corner(left: i32, top: i32, width: i32, height: i32) -> Self {
    Self::new(left + width / 2, top + height / 2, width, height)
  }

  /// 矩形完全落在图像内时返回其位置
  pub fn rect_within(&self, image_width: u32, image_height: u32) -> Option<RoiRect> {
    if self.width <= 0 || self.height <= 0 {
      return None;
    }
    let left = self.x as i64 - (self.width / 2) as i64;
    let top = self.y as i64 - (self.height / 2) as i64;
    if left < 0 || top < 0 {
      return None;
    }
    if left + self.width as i64 > image_width as i64 || top + self.height as i64 > image_height as i64
    {
      return None;
    }
    Some(RoiRect {
      left: left as u32,
      top: top as u32,
      width: self.width as u32,
      height: self.height as u32,
    })
  }
}

/// 检测结果排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum SortMethod {
  #[default]
  Unsorted,
  /// 按中心 x 降序
  XDescending,
  /// 按中心 y 降序
  YDescending,
}

impl TryFrom<i32> for SortMethod {
  type Error = EngineError;

  fn try_from(value: i32) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(SortMethod::Unsorted),
      1 => Ok(SortMethod::XDescending),
      2 => Ok(SortMethod::YDescending),
      other => Err(EngineError::input_invalid(format!("未知排序方式: {}", other))),
    }
  }
}

impl From<SortMethod> for i32 {
  fn from(value: SortMethod) -> Self {
    match value {
      SortMethod::Unsorted => 0,
      SortMethod::XDescending => 1,
      SortMethod::YDescending => 2,
    }
  }
}

fn default_conf() -> f32 {
  DEFAULT_CONF
}

fn default_iou() -> f32 {
  DEFAULT_IOU
}

fn default_max_num() -> i32 {
  DEFAULT_MAX_NUM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
  pub rois: Vec<Roi>,
  #[serde(default = "default_conf")]
  pub conf: f32,
  #[serde(default = "default_iou")]
  pub iou: f32,
  /// 非正数表示不限制
  #[serde(default = "default_max_num")]
  pub max_num: i32,
  #[serde(default)]
  pub sort_method: SortMethod,
  /// Switch 节点的分支取值
  #[serde(default)]
  pub selectors: BTreeMap<String, String>,
}

impl Default for DetectRequest {
  fn default() -> Self {
    Self {
      rois: Vec::new(),
      conf: DEFAULT_CONF,
      iou: DEFAULT_IOU,
      max_num: DEFAULT_MAX_NUM,
      sort_method: SortMethod::default(),
      selectors: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRequest {
  pub rois: Vec<Roi>,
  #[serde(default = "default_conf")]
  pub conf: f32,
  #[serde(default = "default_iou")]
  pub iou: f32,
  #[serde(default = "default_max_num")]
  pub max_num: i32,
  #[serde(default)]
  pub selectors: BTreeMap<String, String>,
}

impl Default for SegmentRequest {
  fn default() -> Self {
    Self {
      rois: Vec::new(),
      conf: DEFAULT_CONF,
      iou: DEFAULT_IOU,
      max_num: DEFAULT_MAX_NUM,
      selectors: BTreeMap::new(),
    }
  }
}

/// 解码阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub conf: f32,
  pub iou: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "lowercase")]
pub enum InferRequest {
  Detect(DetectRequest),
  Segment(SegmentRequest),
}

impl From<DetectRequest> for InferRequest {
  fn from(request: DetectRequest) -> Self {
    InferRequest::Detect(request)
  }
}

impl From<SegmentRequest> for InferRequest {
  fn from(request: SegmentRequest) -> Self {
    InferRequest::Segment(request)
  }
}

impl InferRequest {
  pub fn task(&self) -> TaskKind {
    match self {
      InferRequest::Detect(_) => TaskKind::Detect,
      InferRequest::Segment(_) => TaskKind::Segment,
    }
  }

  pub fn rois(&self) -> &[Roi] {
    match self {
      InferRequest::Detect(r) => &r.rois,
      InferRequest::Segment(r) => &r.rois,
    }
  }

  pub fn thresholds(&self) -> Thresholds {
    match self {
      InferRequest::Detect(r) => Thresholds {
        conf: r.conf,
        iou: r.iou,
      },
      InferRequest::Segment(r) => Thresholds {
        conf: r.conf,
        iou: r.iou,
      },
    }
  }

  /// 截断数量，`None` 表示不限制
  pub fn max_num(&self) -> Option<usize> {
    let max_num = match self {
      InferRequest::Detect(r) => r.max_num,
      InferRequest::Segment(r) => r.max_num,
    };
    (max_num > 0).then_some(max_num as usize)
  }

  pub fn sort_method(&self) -> SortMethod {
    match self {
      InferRequest::Detect(r) => r.sort_method,
      InferRequest::Segment(_) => SortMethod::Unsorted,
    }
  }

  pub fn selectors(&self) -> &BTreeMap<String, String> {
    match self {
      InferRequest::Detect(r) => &r.selectors,
      InferRequest::Segment(r) => &r.selectors,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roi_rect_uses_center_origin() {
    let roi = Roi::new(50, 40, 20, 10);
    let rect = roi.rect_within(100, 100).expect("roi inside image");
    assert_eq!((rect.left, rect.top, rect.width, rect.height), (40, 35, 20, 10));
  }

  #[test]
  fn roi_outside_image_is_rejected() {
    assert!(Roi::new(5, 5, 20, 20).rect_within(100, 100).is_none());
    assert!(Roi::new(95, 50, 20, 20).rect_within(100, 100).is_none());
    assert!(Roi::new(50, 50, 0, 20).rect_within(100, 100).is_none());
    assert!(Roi::full_image(100, 80).rect_within(100, 80).is_some());
    assert!(Roi::full_image(101, 81).rect_within(101, 81).is_some());
  }

  #[test]
  fn request_parses_with_defaults() {
    let json = r#"{"task": "detect", "rois": [{"x": 10, "y": 10, "width": 20, "height": 20}], "sort_method": 2}"#;
    let request: InferRequest = serde_json::from_str(json).expect("valid request");
    assert_eq!(request.task(), TaskKind::Detect);
    assert_eq!(request.sort_method(), SortMethod::YDescending);
    assert_eq!(request.max_num(), None);
    let t = request.thresholds();
    assert!((t.conf - 0.3).abs() < f32::EPSILON);

    let bad = r#"{"task": "detect", "rois": [], "sort_method": 7}"#;
    assert!(serde_json::from_str::<InferRequest>(bad).is_err());
  }
}
