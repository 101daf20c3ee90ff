// 该文件是 Tianshu （天枢） 项目的一部分。
// src/model.rs - 张量模型句柄与推理后端
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

use std::{path::Path, str::FromStr, sync::Arc};

use ndarray::ArrayD;
use thiserror::Error;
use tracing::{debug, info};

use crate::status::EngineError;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("输入数量不匹配: 期望 {expected}, 实际 {actual}")]
  InputCount { expected: usize, actual: usize },
  #[error("张量形状错误: {0}")]
  Shape(String),
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Gpu,
}

impl FromStr for Device {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "gpu" | "cuda" => Ok(Device::Gpu),
      other => Err(EngineError::input_invalid(format!(
        "不支持的推理设备: {}",
        other
      ))),
    }
  }
}

/// 张量名称与形状，动态维度为负数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
  pub name: String,
  pub shape: Vec<i64>,
}

impl TensorInfo {
  pub fn new(name: impl Into<String>, shape: Vec<i64>) -> Self {
    Self {
      name: name.into(),
      shape,
    }
  }

  /// NCHW 输入的 (宽, 高)，维度缺失或为动态时返回 None
  pub fn spatial_size(&self) -> Option<(u32, u32)> {
    if self.shape.len() != 4 {
      return None;
    }
    let (h, w) = (self.shape[2], self.shape[3]);
    if h <= 0 || w <= 0 {
      return None;
    }
    Some((w as u32, h as u32))
  }
}

impl std::fmt::Display for TensorInfo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let dims = self
      .shape
      .iter()
      .map(|d| d.to_string())
      .collect::<Vec<_>>()
      .join("x");
    write!(f, "{} : {}", self.name, dims)
  }
}

/// 一个已加载的模型，只暴露元信息和同步推理
pub trait TensorModel: Send + Sync {
  fn inputs(&self) -> &[TensorInfo];
  fn outputs(&self) -> &[TensorInfo];
  fn run(&self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, ModelError>;
}

/// 推理运行时，负责把模型文件内容变成 [`TensorModel`]
pub trait ModelBackend: Send + Sync {
  fn name(&self) -> &str;
  fn load(&self, model: &[u8], device: Device) -> Result<Box<dyn TensorModel>, ModelError>;
}

/// 读取模型文件并交给后端加载
pub fn load_model_file(
  backend: &dyn ModelBackend,
  path: &Path,
  device: Device,
) -> Result<Box<dyn TensorModel>, EngineError> {
  info!("加载模型文件: {}", path.display());
  let model_data = std::fs::read(path).map_err(|e| EngineError::read_file(path, e))?;
  if model_data.is_empty() {
    return Err(EngineError::input_invalid(format!(
      "模型文件为空: {}",
      path.display()
    )));
  }
  debug!(
    "模型文件大小: {:.2} MB",
    model_data.len() as f64 / (1024.0 * 1024.0)
  );

  let model = backend.load(&model_data, device)?;
  for input in model.inputs() {
    debug!("模型输入 {}", input);
  }
  for output in model.outputs() {
    debug!("模型输出 {}", output);
  }
  info!("模型加载完成 ({})", backend.name());
  Ok(model)
}

#[cfg(feature = "onnxruntime")]
mod ort_model;
#[cfg(feature = "onnxruntime")]
pub use self::ort_model::{OrtBackend, OrtModel};

/// 编译时启用的默认后端
pub fn default_backend() -> Option<Arc<dyn ModelBackend>> {
  #[cfg(feature = "onnxruntime")]
  let backend: Option<Arc<dyn ModelBackend>> = Some(Arc::new(OrtBackend::default()));
  #[cfg(not(feature = "onnxruntime"))]
  let backend: Option<Arc<dyn ModelBackend>> = None;
  backend
}
