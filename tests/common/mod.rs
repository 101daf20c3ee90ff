// 该文件是 Tianshu （天枢） 项目的一部分。
// tests/common/mod.rs - 集成测试用的合成推理后端
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

#![allow(dead_code)]

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
  sync::Arc,
};

use image::{Rgb, RgbImage};
use ndarray::{Array3, ArrayD, IxDyn};
use tianshu::{
  InferEngine, TaskKind,
  model::{Device, ModelBackend, ModelError, TensorInfo, TensorModel},
};

/// 原型分辨率相对输入的下采样倍数
pub const PROTO_STRIDE: usize = 4;
pub const NUM_CLASSES: usize = 2;

/// 模型文件内容即模型描述：
/// `detect <w> <h>`、`detect-dynamic`、`segment <w> <h>`、`panic`
pub struct SyntheticBackend;

#[derive(Debug, Clone, Copy)]
enum Kind {
  Detect,
  Segment,
  Panic,
}

struct SyntheticModel {
  kind: Kind,
  inputs: Vec<TensorInfo>,
  outputs: Vec<TensorInfo>,
}

impl ModelBackend for SyntheticBackend {
  fn name(&self) -> &str {
    "synthetic"
  }

  fn load(&self, model: &[u8], _device: Device) -> Result<Box<dyn TensorModel>, ModelError> {
    let text = std::str::from_utf8(model).map_err(|e| ModelError::ModelInvalid(e.to_string()))?;
    let words: Vec<&str> = text.split_whitespace().collect();
    let size = |words: &[&str]| -> Result<(i64, i64), ModelError> {
      match words {
        [w, h] => Ok((
          w.parse().map_err(|_| ModelError::ModelInvalid(text.to_string()))?,
          h.parse().map_err(|_| ModelError::ModelInvalid(text.to_string()))?,
        )),
        _ => Err(ModelError::ModelInvalid(text.to_string())),
      }
    };
    let (kind, (w, h)) = match words.as_slice() {
      ["detect", rest @ ..] => (Kind::Detect, size(rest)?),
      ["detect-dynamic"] => (Kind::Detect, (-1, -1)),
      ["segment", rest @ ..] => (Kind::Segment, size(rest)?),
      ["panic"] => (Kind::Panic, (32, 32)),
      _ => return Err(ModelError::ModelInvalid(text.to_string())),
    };
    Ok(Box::new(SyntheticModel {
      kind,
      inputs: vec![TensorInfo::new("images", vec![1, 3, h, w])],
      outputs: vec![TensorInfo::new("output0", vec![1, -1, -1])],
    }))
  }
}

/// 输入中 R 通道大于 0.5 的连通区域
struct Blob {
  x_min: usize,
  y_min: usize,
  x_max: usize,
  y_max: usize,
  score: f32,
  class_id: usize,
}

fn find_blobs(input: &ArrayD<f32>) -> Vec<Blob> {
  let shape = input.shape();
  let (h, w) = (shape[2], shape[3]);
  let bright = |y: usize, x: usize| input[[0, 0, y, x]] > 0.5;
  let mut seen = vec![false; h * w];
  let mut blobs = Vec::new();

  for sy in 0..h {
    for sx in 0..w {
      if seen[sy * w + sx] || !bright(sy, sx) {
        continue;
      }
      let mut blob = Blob {
        x_min: sx,
        y_min: sy,
        x_max: sx,
        y_max: sy,
        score: 0.0,
        class_id: 0,
      };
      let (mut sum, mut blue, mut count) = (0.0f32, 0.0f32, 0usize);
      let mut queue = VecDeque::from([(sy, sx)]);
      seen[sy * w + sx] = true;
      while let Some((y, x)) = queue.pop_front() {
        blob.x_min = blob.x_min.min(x);
        blob.x_max = blob.x_max.max(x);
        blob.y_min = blob.y_min.min(y);
        blob.y_max = blob.y_max.max(y);
        sum += input[[0, 0, y, x]];
        blue += input[[0, 2, y, x]];
        count += 1;
        let neighbours = [
          (y.wrapping_sub(1), x),
          (y + 1, x),
          (y, x.wrapping_sub(1)),
          (y, x + 1),
        ];
        for (ny, nx) in neighbours {
          if ny < h && nx < w && !seen[ny * w + nx] && bright(ny, nx) {
            seen[ny * w + nx] = true;
            queue.push_back((ny, nx));
          }
        }
      }
      blob.score = sum / count as f32;
      blob.class_id = usize::from(blue / count as f32 > 0.5);
      blobs.push(blob);
    }
  }
  blobs
}

impl SyntheticModel {
  fn proposals(blobs: &[Blob], num_coeffs: usize) -> ArrayD<f32> {
    let channels = 4 + NUM_CLASSES + num_coeffs;
    let n = blobs.len().max(1);
    let mut out = Array3::<f32>::zeros((1, channels, n));
    for (j, blob) in blobs.iter().enumerate() {
      let (x0, y0) = (blob.x_min as f32, blob.y_min as f32);
      let (x1, y1) = (blob.x_max as f32 + 1.0, blob.y_max as f32 + 1.0);
      out[[0, 0, j]] = (x0 + x1) / 2.0;
      out[[0, 1, j]] = (y0 + y1) / 2.0;
      out[[0, 2, j]] = x1 - x0;
      out[[0, 3, j]] = y1 - y0;
      out[[0, 4 + blob.class_id, j]] = blob.score;
      for k in 0..num_coeffs {
        out[[0, 4 + NUM_CLASSES + k, j]] = 1.0;
      }
    }
    out.into_dyn()
  }

  fn protos(input: &ArrayD<f32>) -> ArrayD<f32> {
    let shape = input.shape();
    let (mh, mw) = (shape[2] / PROTO_STRIDE, shape[3] / PROTO_STRIDE);
    ArrayD::from_shape_fn(IxDyn(&[1, 1, mh, mw]), |idx| {
      let y = idx[2] * PROTO_STRIDE + PROTO_STRIDE / 2;
      let x = idx[3] * PROTO_STRIDE + PROTO_STRIDE / 2;
      if input[[0, 0, y, x]] > 0.5 { 1.0 } else { -1.0 }
    })
  }
}

impl TensorModel for SyntheticModel {
  fn inputs(&self) -> &[TensorInfo] {
    &self.inputs
  }

  fn outputs(&self) -> &[TensorInfo] {
    &self.outputs
  }

  fn run(&self, inputs: &[ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>, ModelError> {
    let [input] = inputs else {
      return Err(ModelError::InputCount {
        expected: 1,
        actual: inputs.len(),
      });
    };
    match self.kind {
      Kind::Detect => Ok(vec![Self::proposals(&find_blobs(input), 0)]),
      Kind::Segment => Ok(vec![
        Self::proposals(&find_blobs(input), 1),
        Self::protos(input),
      ]),
      Kind::Panic => panic!("synthetic model crashed"),
    }
  }
}

/// 写入模型文件与配置文件的临时工作目录
pub struct Workspace {
  pub dir: tempfile::TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      dir: tempfile::tempdir().expect("tempdir"),
    }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.dir.path().join(name)
  }

  pub fn model(&self, name: &str, description: &str) -> PathBuf {
    let path = self.path(name);
    std::fs::write(&path, description).expect("write model");
    path
  }

  pub fn config(&self, name: &str, content: &str) -> PathBuf {
    let path = self.path(name);
    std::fs::write(&path, content).expect("write config");
    path
  }
}

/// 单模块流水线配置
pub fn single_module_config(class: &str, model: &Path, extra_cfgs: &str) -> String {
  format!(
    r#"{{
      "modules": {{
        "m": {{
          "class": "{class}",
          "init_params": {{
            "model_path": [{model:?}],
            "cfgs": {{ {extra_cfgs} }},
            "id_cfgs": {{"0": "scratch", "1": "dent"}}
          }}
        }}
      }},
      "graph": {{"main": [{{"type": "Run", "model_id": "m"}}]}}
    }}"#,
    class = class,
    model = model.display().to_string(),
    extra_cfgs = extra_cfgs,
  )
}

pub fn engine(task: TaskKind) -> InferEngine {
  InferEngine::builder(task)
    .backend(Arc::new(SyntheticBackend))
    .build()
    .expect("engine")
}

pub fn loaded_engine(task: TaskKind, config: &Path) -> InferEngine {
  let mut engine = engine(task);
  engine.load_resources(config).expect("load resources");
  engine
}

/// 黑色背景上的亮色矩形，`[left, top, right, bottom)`
pub fn image_with_rects(width: u32, height: u32, rects: &[([u32; 4], [u8; 3])]) -> RgbImage {
  let mut image = RgbImage::new(width, height);
  for ([left, top, right, bottom], color) in rects {
    for y in *top..*bottom {
      for x in *left..*right {
        image.put_pixel(x, y, Rgb(*color));
      }
    }
  }
  image
}

pub fn assert_near(actual: f32, expected: f32, tolerance: f32) {
  assert!(
    (actual - expected).abs() <= tolerance,
    "expected {} ± {}, got {}",
    expected,
    tolerance,
    actual
  );
}
