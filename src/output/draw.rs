// 该文件是 Tianshu （天枢） 项目的一部分。
// src/output/draw.rs - 推理结果可视化与记录
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

use std::path::Path;

use ab_glyph::{FontVec, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut},
  rect::Rect,
};

use crate::result::{InferResult, Mask, RotateBox};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const MASK_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
  box_color: [u8; 3],
  mask_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      box_color: BOX_COLOR,
      mask_color: MASK_COLOR,
    }
  }
}

impl Draw {
  /// 使用字体数据绘制标签，未设置字体时只绘制边框
  pub fn with_font(mut self, font_data: Vec<u8>) -> Result<Self, InvalidFont> {
    self.font = Some(FontVec::try_from_vec(font_data)?);
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_closed_path(image: &mut RgbImage, points: &[(f32, f32)], color: [u8; 3]) {
    if points.len() < 2 {
      return;
    }
    for (i, start) in points.iter().enumerate() {
      let end = points[(i + 1) % points.len()];
      draw_line_segment_mut(image, *start, end, Rgb(color));
    }
  }

  // 旋转框四个顶点，角度单位为度
  fn box_outline(bbox: &RotateBox) -> [(f32, f32); 4] {
    let (sin, cos) = bbox.angle.to_radians().sin_cos();
    let (hw, hh) = (bbox.width / 2.0, bbox.height / 2.0);
    [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)]
      .map(|(dx, dy)| (bbox.x + dx * cos - dy * sin, bbox.y + dx * sin + dy * cos))
  }

  fn draw_label(&self, image: &mut RgbImage, anchor: (i32, i32), label: &str, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let (w, _) = image.dimensions();
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = anchor.0.max(0);
    let label_y = (anchor.1 - self.label_text_height).max(0);

    // 确保标签不超出图像边界
    let label_width = text_width.min((w as i32 - label_x).max(0));
    if label_width <= 0 || self.label_text_height <= 0 {
      return;
    }
    let rect =
      Rect::at(label_x, label_y).of_size(label_width as u32, self.label_text_height as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      label,
    );
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: &RotateBox) {
    let outline = Self::box_outline(bbox);
    // 边框加粗为 2 像素
    Self::draw_closed_path(image, &outline, self.box_color);
    let inner = outline.map(|(x, y)| {
      (
        x + (bbox.x - x).signum(),
        y + (bbox.y - y).signum(),
      )
    });
    Self::draw_closed_path(image, &inner, self.box_color);

    let [x_min, y_min, _, _] = bbox.corners();
    let label = format!("{} {:.2}", bbox.class_name, bbox.score);
    self.draw_label(image, (x_min.floor() as i32, y_min.floor() as i32), &label, self.box_color);
  }

  fn draw_mask(&self, image: &mut RgbImage, mask: &Mask) {
    let points: Vec<(f32, f32)> = mask
      .points
      .iter()
      .map(|p| (p.x as f32, p.y as f32))
      .collect();
    Self::draw_closed_path(image, &points, self.mask_color);

    if let Some(top) = mask.points.iter().min_by_key(|p| (p.y, p.x)) {
      let label = format!("{} {:.2}", mask.class_name, mask.score);
      self.draw_label(image, (top.x, top.y), &label, self.mask_color);
    }
  }

  /// 在图像上绘制所有槽位的结果
  pub fn draw_result_on_image(&self, image: &mut RgbImage, result: &InferResult) {
    match result {
      InferResult::Detect(slots) => slots
        .iter()
        .flatten()
        .for_each(|bbox| self.draw_box(image, bbox)),
      InferResult::Segment(slots) => slots
        .iter()
        .flatten()
        .for_each(|mask| self.draw_mask(image, mask)),
    }
  }

  pub fn draw_result(&self, image: &RgbImage, result: &InferResult) -> RgbImage {
    let mut image = image.clone();
    self.draw_result_on_image(&mut image, result);
    image
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
  /// 文本，类别以名称表示
  Name,
  /// 文本，类别以编号表示
  Id,
  Json,
}

/// 把结果写成与图像同名的文本文件
pub struct Record {
  pub format: RecordFormat,
}

impl Record {
  fn label(&self, class_id: u32, class_name: &str) -> String {
    match self.format {
      RecordFormat::Id => class_id.to_string(),
      _ => class_name.to_string(),
    }
  }

  fn text_lines(&self, result: &InferResult) -> Vec<String> {
    let mut records = Vec::new();
    match result {
      InferResult::Detect(slots) => {
        for (slot, boxes) in slots.iter().enumerate() {
          for b in boxes {
            records.push(format!(
              "{}, {}, {:.4}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}",
              slot,
              self.label(b.class_id, &b.class_name),
              b.score,
              b.x,
              b.y,
              b.width,
              b.height,
              b.angle
            ));
          }
        }
      }
      InferResult::Segment(slots) => {
        for (slot, masks) in slots.iter().enumerate() {
          for m in masks {
            let points: Vec<String> = m.points.iter().map(|p| format!("{} {}", p.x, p.y)).collect();
            records.push(format!(
              "{}, {}, {:.4}, {}",
              slot,
              self.label(m.class_id, &m.class_name),
              m.score,
              points.join(" ")
            ));
          }
        }
      }
    }
    records
  }

  pub fn record(&self, result: &InferResult, path: &Path) -> Result<(), std::io::Error> {
    match self.format {
      RecordFormat::Json => {
        let content = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
        std::fs::write(path.with_extension("json"), content)
      }
      _ => std::fs::write(path.with_extension("txt"), self.text_lines(result).join("\n")),
    }
  }
}
