// 该文件是 Tianshu （天枢） 项目的一部分。
// src/module/infer_module.rs - 模型推理模块
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

use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::ProcessingModule;
use crate::{
  frame::ChannelOrder,
  graph::ExecutionContext,
  model::{Device, ModelBackend, TensorModel, load_model_file},
  postprocess::{ClassTable, DecodeParams, ResizeMode, decode_detections, decode_segments},
  preprocess::{DirectResize, Letterbox, PreProcess},
  request::TaskKind,
  result::TaskOutput,
  status::EngineError,
};

/// `init_params` 的结构
#[derive(Debug, Clone, Deserialize)]
pub struct InferModuleParams {
  pub model_path: Vec<PathBuf>,
  #[serde(default)]
  pub cfgs: ModuleCfgs,
  #[serde(default)]
  pub id_cfgs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleCfgs {
  /// `cpu` 或 `gpu`，缺省为 `cpu`
  #[serde(default)]
  pub device: Option<String>,
  /// `rgb` 或 `bgr`，缺省为 `rgb`
  #[serde(default)]
  pub channel_order: Option<String>,
  /// 模型输入为动态尺寸时使用的 [宽, 高]
  #[serde(default)]
  pub input_size: Option<[u32; 2]>,
}

/// 后处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
  Detect(ResizeMode),
  Segment,
}

impl Decoder {
  pub fn task(self) -> TaskKind {
    match self {
      Decoder::Detect(_) => TaskKind::Detect,
      Decoder::Segment => TaskKind::Segment,
    }
  }

  fn resize_mode(self) -> ResizeMode {
    match self {
      Decoder::Detect(mode) => mode,
      Decoder::Segment => ResizeMode::Letterbox,
    }
  }
}

fn preprocess_for(mode: ResizeMode, channel_order: ChannelOrder) -> Box<dyn PreProcess> {
  match mode {
    ResizeMode::Direct => Box::new(DirectResize { channel_order }),
    ResizeMode::Letterbox => Box::new(Letterbox { channel_order }),
  }
}

/// 单模型推理模块：预处理、推理、后处理
pub struct InferModule {
  class_name: &'static str,
  decoder: Decoder,
  preprocess: Box<dyn PreProcess>,
  models: Vec<Box<dyn TensorModel>>,
  classes: ClassTable,
  input_size: Option<(u32, u32)>,
}

impl InferModule {
  pub const YOLO_DETECT: &'static str = "YoloDetectModule";
  pub const YOLO_LETTERBOX_DETECT: &'static str = "YoloLetterboxDetectModule";
  pub const YOLO_SEGMENT: &'static str = "YoloSegmentModule";

  pub fn new(class_name: &'static str, decoder: Decoder) -> Self {
    Self {
      class_name,
      decoder,
      preprocess: preprocess_for(decoder.resize_mode(), ChannelOrder::default()),
      models: Vec::new(),
      classes: ClassTable::default(),
      input_size: None,
    }
  }

  /// 直接缩放 + 检测解码
  pub fn yolo_detect() -> Self {
    Self::new(Self::YOLO_DETECT, Decoder::Detect(ResizeMode::Direct))
  }

  /// letterbox + 检测解码
  pub fn yolo_letterbox_detect() -> Self {
    Self::new(
      Self::YOLO_LETTERBOX_DETECT,
      Decoder::Detect(ResizeMode::Letterbox),
    )
  }

  /// letterbox + 分割解码
  pub fn yolo_segment() -> Self {
    Self::new(Self::YOLO_SEGMENT, Decoder::Segment)
  }

  pub fn classes(&self) -> &ClassTable {
    &self.classes
  }

  fn model_input_size(&self, model: &dyn TensorModel) -> Result<(u32, u32), EngineError> {
    if let Some(size) = self.input_size {
      return Ok(size);
    }
    model
      .inputs()
      .first()
      .and_then(|input| input.spatial_size())
      .ok_or_else(|| EngineError::input_invalid("模型输入尺寸为动态，需要配置 cfgs.input_size"))
  }
}

impl ProcessingModule for InferModule {
  fn class_name(&self) -> &str {
    self.class_name
  }

  fn task(&self) -> Option<TaskKind> {
    Some(self.decoder.task())
  }

  fn init(&mut self, params: &serde_json::Value, backend: &dyn ModelBackend) -> Result<(), EngineError> {
    info!("{} 初始化", self.class_name);
    let params = InferModuleParams::deserialize(params)
      .map_err(|e| EngineError::input_invalid(format!("{} 初始化参数错误: {}", self.class_name, e)))?;
    if params.model_path.is_empty() {
      error!("model_path 为空");
      return Err(EngineError::input_invalid("model_path 为空"));
    }

    let device = match &params.cfgs.device {
      Some(device) => device.parse::<Device>()?,
      None => Device::default(),
    };
    let channel_order = match &params.cfgs.channel_order {
      Some(order) => order.parse::<ChannelOrder>()?,
      None => ChannelOrder::default(),
    };
    let input_size = match params.cfgs.input_size {
      Some([0, _]) | Some([_, 0]) => {
        return Err(EngineError::input_invalid("cfgs.input_size 不能为 0"));
      }
      Some([w, h]) => Some((w, h)),
      None => None,
    };
    let classes = ClassTable::from_id_cfgs(&params.id_cfgs)?;
    if classes.is_empty() {
      warn!("{} 的类别配置为空，推理时将跳过", self.class_name);
    }

    let mut models = Vec::with_capacity(params.model_path.len());
    for path in &params.model_path {
      models.push(load_model_file(backend, path, device)?);
    }
    if models.len() > 1 {
      debug!("加载了 {} 个模型，推理只使用第一个", models.len());
    }

    self.preprocess = preprocess_for(self.decoder.resize_mode(), channel_order);
    self.models = models;
    self.classes = classes;
    self.input_size = input_size;
    info!("{} 初始化完成", self.class_name);
    Ok(())
  }

  fn run(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
    let model = self.models.first().ok_or(EngineError::WrongState)?;
    let image = ctx.image;
    if image.width() == 0 || image.height() == 0 {
      info!("输入图像无效，跳过推理");
      return Err(EngineError::input_invalid("输入图像为空"));
    }

    let input_size = self.model_input_size(model.as_ref())?;
    let frame = self.preprocess.preprocess(image, input_size)?;

    let now = std::time::Instant::now();
    let outputs = model
      .run(&[frame.into_dyn()])
      .map_err(|e| EngineError::RunInferFailed(e.to_string()))?;
    debug!("{} 推理耗时: {:.2?}", self.class_name, now.elapsed());

    let params = DecodeParams {
      image_size: image.dimensions(),
      input_size,
      thresholds: ctx.request.thresholds(),
    };
    let output = match self.decoder {
      Decoder::Detect(mode) => {
        let first = outputs
          .first()
          .ok_or_else(|| EngineError::output_invalid("模型没有输出"))?;
        TaskOutput::Boxes(decode_detections(first, &self.classes, mode, &params)?)
      }
      Decoder::Segment => TaskOutput::Masks(decode_segments(&outputs, &self.classes, &params)?),
    };

    if !ctx.output.extend(output) {
      return Err(EngineError::input_invalid(format!(
        "{} 的输出类别与任务不一致",
        self.class_name
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn params_parse_with_optional_cfgs() {
    let value = serde_json::json!({
      "model_path": ["a.onnx"],
      "cfgs": {"device": "gpu", "input_size": [640, 480]},
      "id_cfgs": {"0": "scratch"}
    });
    let params = InferModuleParams::deserialize(&value).expect("valid params");
    assert_eq!(params.model_path, vec![PathBuf::from("a.onnx")]);
    assert_eq!(params.cfgs.device.as_deref(), Some("gpu"));
    assert_eq!(params.cfgs.input_size, Some([640, 480]));
    assert_eq!(params.id_cfgs.len(), 1);

    let minimal = serde_json::json!({"model_path": []});
    let params = InferModuleParams::deserialize(&minimal).expect("defaults");
    assert!(params.cfgs.channel_order.is_none());
  }

  #[test]
  fn module_variants_report_tasks() {
    assert_eq!(InferModule::yolo_detect().task(), Some(TaskKind::Detect));
    assert_eq!(
      InferModule::yolo_letterbox_detect().task(),
      Some(TaskKind::Detect)
    );
    assert_eq!(InferModule::yolo_segment().task(), Some(TaskKind::Segment));
    assert_eq!(InferModule::yolo_segment().class_name(), "YoloSegmentModule");
  }
}
