// 该文件是 Tianshu （天枢） 项目的一部分。
// src/frame.rs - NCHW 张量帧
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

use std::str::FromStr;

use image::RgbImage;
use ndarray::{Array4, ArrayD};

use crate::status::EngineError;

const RGB_CHANNELS: usize = 3;

/// 模型期望的通道顺序，输入图像总是 RGB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl FromStr for ChannelOrder {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(EngineError::input_invalid(format!(
        "不支持的通道顺序: {}",
        other
      ))),
    }
  }
}

impl ChannelOrder {
  fn source_channel(self, c: usize) -> usize {
    match self {
      ChannelOrder::Rgb => c,
      ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
    }
  }
}

/// 归一化后的 `[1, 3, H, W]` 浮点帧
#[derive(Debug, Clone)]
pub struct NchwFrame {
  data: Array4<f32>,
}

impl NchwFrame {
  /// HWC 转 CHW，同时按 `factor` 归一化
  pub fn from_rgb_image(image: &RgbImage, order: ChannelOrder, factor: f32) -> Self {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let raw = image.as_raw();

    let mut data = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));
    for c in 0..RGB_CHANNELS {
      let src_c = order.source_channel(c);
      for h in 0..height {
        for w in 0..width {
          let index = (h * width + w) * RGB_CHANNELS + src_c;
          data[[0, c, h, w]] = raw[index] as f32 * factor;
        }
      }
    }
    Self { data }
  }

  pub fn height(&self) -> usize {
    self.data.shape()[2]
  }

  pub fn width(&self) -> usize {
    self.data.shape()[3]
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_array(&self) -> &Array4<f32> {
    &self.data
  }

  pub fn into_dyn(self) -> ArrayD<f32> {
    self.data.into_dyn()
  }
}
