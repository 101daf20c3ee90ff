// 该文件是 Tianshu （天枢） 项目的一部分。
// src/model/ort_model.rs - ONNX Runtime 推理后端
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

use std::sync::{Mutex, MutexGuard, PoisonError};

use ndarray::ArrayD;
use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
  session::{Session, builder::GraphOptimizationLevel},
  value::{Value, ValueType},
};
use tracing::{debug, error, info};

use crate::model::{Device, ModelBackend, ModelError, TensorInfo, TensorModel};

const ORT_NUM_INPUTS: usize = 1;

impl From<ort::Error> for ModelError {
  fn from(err: ort::Error) -> Self {
    ModelError::Backend(err.to_string())
  }
}

/// ONNX Runtime 后端
#[derive(Debug, Clone)]
pub struct OrtBackend {
  intra_threads: usize,
}

impl Default for OrtBackend {
  fn default() -> Self {
    Self { intra_threads: 4 }
  }
}

impl OrtBackend {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }
}

impl ModelBackend for OrtBackend {
  fn name(&self) -> &str {
    "onnxruntime"
  }

  fn load(&self, model: &[u8], device: Device) -> Result<Box<dyn TensorModel>, ModelError> {
    info!("创建 ONNX Runtime 推理会话");
    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level2)?
      .with_intra_threads(self.intra_threads)?;

    // GPU 不可用时 CUDA 提供者会静默回落到 CPU
    let builder = match device {
      Device::Gpu => builder.with_execution_providers([
        CUDAExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ])?,
      Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()])?,
    };
    let session = builder.commit_from_memory(model)?;

    let inputs: Vec<TensorInfo> = session
      .inputs
      .iter()
      .map(|input| TensorInfo::new(input.name.clone(), tensor_shape(&input.input_type)))
      .collect();
    let outputs: Vec<TensorInfo> = session
      .outputs
      .iter()
      .map(|output| TensorInfo::new(output.name.clone(), tensor_shape(&output.output_type)))
      .collect();

    if inputs.len() != ORT_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        ORT_NUM_INPUTS,
        inputs.len()
      );
      return Err(ModelError::InputCount {
        expected: ORT_NUM_INPUTS,
        actual: inputs.len(),
      });
    }
    if outputs.is_empty() {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }

    Ok(Box::new(OrtModel {
      session: Mutex::new(session),
      inputs,
      outputs,
    }))
  }
}

/// 其他线程在持锁时 panic 不影响会话本身，取回后继续使用
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn tensor_shape(value_type: &ValueType) -> Vec<i64> {
  match value_type {
    ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
    _ => Vec::new(),
  }
}

/// 单个 ONNX 会话，同一句柄上的推理串行执行
pub struct OrtModel {
  session: Mutex<Session>,
  inputs: Vec<TensorInfo>,
  outputs: Vec<TensorInfo>,
}

impl TensorModel for OrtModel {
  fn inputs(&self) -> &[TensorInfo] {
    &self.inputs
  }

  fn outputs(&self) -> &[TensorInfo] {
    &self.outputs
  }

  fn run(&self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, ModelError> {
    if inputs.len() != self.inputs.len() {
      return Err(ModelError::InputCount {
        expected: self.inputs.len(),
        actual: inputs.len(),
      });
    }

    let input_tensor = Value::from_array(inputs[0].clone())?;
    let feeds = ort::inputs![self.inputs[0].name.as_str() => input_tensor];

    let mut session = lock_recovering(&self.session);

    debug!("执行模型推理");
    let now = std::time::Instant::now();
    let outputs = session.run(feeds)?;
    debug!("模型推理完成，耗时: {:.2?}", now.elapsed());

    let mut results = Vec::with_capacity(self.outputs.len());
    for info in &self.outputs {
      let array = outputs[info.name.as_str()]
        .try_extract_array::<f32>()
        .map_err(|e| ModelError::Shape(format!("输出 {} 无法转换: {}", info.name, e)))?;
      results.push(array.to_owned());
    }
    Ok(results)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn poisoned_lock_is_recovered() {
    let mutex = Mutex::new(7u32);
    let poisoned = std::panic::catch_unwind(|| {
      let _guard = mutex.lock().expect("first lock");
      panic!("推理中断");
    });
    assert!(poisoned.is_err());
    assert!(mutex.is_poisoned());

    let mut value = lock_recovering(&mutex);
    *value += 1;
    assert_eq!(*value, 8);
  }
}
