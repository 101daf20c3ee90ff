// 该文件是 Tianshu （天枢） 项目的一部分。
// src/preprocess.rs - 图像预处理策略
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

use image::{Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{
  frame::{ChannelOrder, NchwFrame},
  status::EngineError,
};

const NORMALIZE_FACTOR: f32 = 1.0 / 255.0;
pub const LETTERBOX_PAD_VALUE: [u8; 3] = [114, 114, 114];

/// 原图坐标与模型输入坐标之间的仿射关系
///
/// `input = source * scale + pad`，直接缩放时两个方向的比例独立、没有填充；
/// letterbox 时两个方向共享同一比例并居中填充。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputTransform {
  pub scale_x: f32,
  pub scale_y: f32,
  pub pad_left: f32,
  pub pad_top: f32,
  pub resized_width: u32,
  pub resized_height: u32,
}

impl InputTransform {
  pub fn direct(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    Self {
      scale_x: dst_w as f32 / src_w as f32,
      scale_y: dst_h as f32 / src_h as f32,
      pad_left: 0.0,
      pad_top: 0.0,
      resized_width: dst_w,
      resized_height: dst_h,
    }
  }

  pub fn letterbox(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
    let r = (dst_w as f32 / src_w as f32).min(dst_h as f32 / src_h as f32);
    let resized_width = ((r * src_w as f32).round() as u32).clamp(1, dst_w.max(1));
    let resized_height = ((r * src_h as f32).round() as u32).clamp(1, dst_h.max(1));
    let dw = (dst_w - resized_width) as f32 / 2.0;
    let dh = (dst_h - resized_height) as f32 / 2.0;
    Self {
      scale_x: r,
      scale_y: r,
      pad_left: (dw - 0.1).round().max(0.0),
      pad_top: (dh - 0.1).round().max(0.0),
      resized_width,
      resized_height,
    }
  }

  /// 模型输入坐标映射回原图
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_left) / self.scale_x,
      (y - self.pad_top) / self.scale_y,
    )
  }

  /// 原图坐标映射到模型输入
  pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale_x + self.pad_left,
      y * self.scale_y + self.pad_top,
    )
  }
}

/// 图像到输入张量的转换策略
pub trait PreProcess: Send + Sync + std::fmt::Debug {
  fn name(&self) -> &'static str;

  /// `input_size` 为模型输入的 (宽, 高)
  fn preprocess(&self, image: &RgbImage, input_size: (u32, u32)) -> Result<NchwFrame, EngineError>;
}

fn check_sizes(image: &RgbImage, input_size: (u32, u32)) -> Result<(), EngineError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(EngineError::input_invalid("输入图像为空"));
  }
  if input_size.0 == 0 || input_size.1 == 0 {
    return Err(EngineError::input_invalid(format!(
      "模型输入尺寸无效: {}x{}",
      input_size.0, input_size.1
    )));
  }
  Ok(())
}

/// 直接缩放到模型输入尺寸，不保持宽高比
#[derive(Debug, Clone, Default)]
pub struct DirectResize {
  pub channel_order: ChannelOrder,
}

impl PreProcess for DirectResize {
  fn name(&self) -> &'static str {
    "direct_resize"
  }

  fn preprocess(&self, image: &RgbImage, input_size: (u32, u32)) -> Result<NchwFrame, EngineError> {
    check_sizes(image, input_size)?;
    let (input_w, input_h) = input_size;
    let resized = image::imageops::resize(image, input_w, input_h, FilterType::Triangle);
    Ok(NchwFrame::from_rgb_image(
      &resized,
      self.channel_order,
      NORMALIZE_FACTOR,
    ))
  }
}

/// 等比缩放后居中填充灰色
#[derive(Debug, Clone, Default)]
pub struct Letterbox {
  pub channel_order: ChannelOrder,
}

impl Letterbox {
  /// 返回填充后的图像，供预处理和可视化复用
  pub fn letterbox_image(image: &RgbImage, input_size: (u32, u32)) -> RgbImage {
    let (input_w, input_h) = input_size;
    let transform = InputTransform::letterbox(image.width(), image.height(), input_w, input_h);
    let resized = image::imageops::resize(
      image,
      transform.resized_width,
      transform.resized_height,
      FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(input_w, input_h, Rgb(LETTERBOX_PAD_VALUE));
    image::imageops::replace(
      &mut canvas,
      &resized,
      transform.pad_left as i64,
      transform.pad_top as i64,
    );
    canvas
  }
}

impl PreProcess for Letterbox {
  fn name(&self) -> &'static str {
    "letterbox"
  }

  fn preprocess(&self, image: &RgbImage, input_size: (u32, u32)) -> Result<NchwFrame, EngineError> {
    check_sizes(image, input_size)?;
    let now = std::time::Instant::now();
    let canvas = Self::letterbox_image(image, input_size);
    let frame = NchwFrame::from_rgb_image(&canvas, self.channel_order, NORMALIZE_FACTOR);
    debug!("letterbox 预处理耗时: {:.2?}", now.elapsed());
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn letterbox_geometry_for_wide_image() {
    let t = InputTransform::letterbox(200, 100, 64, 64);
    assert!((t.scale_x - 0.32).abs() < 1e-6);
    assert_eq!((t.resized_width, t.resized_height), (64, 32));
    assert_eq!((t.pad_left, t.pad_top), (0.0, 16.0));

    let (sx, sy) = t.to_source(32.0, 32.0);
    assert!((sx - 100.0).abs() < 1e-3);
    assert!((sy - 50.0).abs() < 1e-3);
  }

  #[test]
  fn letterbox_odd_padding_rounds_down_on_top() {
    // 64 - 59 = 5 -> top 2, bottom 3
    let t = InputTransform::letterbox(100, 92, 64, 64);
    assert_eq!(t.resized_height, 59);
    assert_eq!(t.pad_top, 2.0);
  }

  #[test]
  fn direct_transform_is_independent_per_axis() {
    let t = InputTransform::direct(200, 100, 64, 32);
    let (x, y) = t.to_input(100.0, 50.0);
    assert!((x - 32.0).abs() < 1e-6 && (y - 16.0).abs() < 1e-6);
    let (sx, sy) = t.to_source(x, y);
    assert!((sx - 100.0).abs() < 1e-4 && (sy - 50.0).abs() < 1e-4);
  }

  #[test]
  fn letterbox_pads_with_gray() {
    let image = RgbImage::from_pixel(40, 20, Rgb([255, 255, 255]));
    let frame = Letterbox::default()
      .preprocess(&image, (32, 32))
      .expect("letterbox");
    let data = frame.as_array();
    assert_eq!(data.shape(), &[1, 3, 32, 32]);
    let gray = 114.0 / 255.0;
    assert!((data[[0, 0, 0, 0]] - gray).abs() < 1e-6);
    assert!((data[[0, 0, 16, 16]] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn direct_resize_rejects_empty_image() {
    let image = RgbImage::new(0, 0);
    let err = DirectResize::default()
      .preprocess(&image, (32, 32))
      .expect_err("empty image");
    assert_eq!(err.status(), crate::status::Status::InputInvalid);
  }
}
