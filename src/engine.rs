// 该文件是 Tianshu （天枢） 项目的一部分。
// src/engine.rs - 推理引擎与 ROI 调度
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

use std::{path::Path, sync::Arc};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  graph::{self, ExecutionContext, MAIN_BLOCK, PipelineSpec},
  model::{ModelBackend, ModelError, default_backend},
  module::{ModuleMap, ModuleRegistry},
  request::{InferRequest, TaskKind},
  result::InferResult,
  status::EngineError,
};

/// 一次成功加载得到的配置与模块
struct LoadedAssets {
  spec: PipelineSpec,
  modules: ModuleMap,
}

pub struct InferEngineBuilder {
  task: TaskKind,
  backend: Option<Arc<dyn ModelBackend>>,
  registry: Option<ModuleRegistry>,
}

impl InferEngineBuilder {
  /// 指定推理后端，缺省使用编译时启用的后端
  pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
    self.backend = Some(backend);
    self
  }

  /// 指定模块注册表，缺省为内置模块
  pub fn registry(mut self, registry: ModuleRegistry) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn build(self) -> Result<InferEngine, EngineError> {
    let backend = self.backend.or_else(default_backend).ok_or_else(|| {
      EngineError::LoadModelFailed(ModelError::Backend("未启用任何推理后端".to_string()))
    })?;
    info!("创建 {} 推理引擎, 后端: {}", self.task, backend.name());
    Ok(InferEngine {
      task: self.task,
      backend,
      registry: self.registry.unwrap_or_default(),
      assets: None,
    })
  }
}

/// 某一任务类别的推理引擎
///
/// 加载与清理需要独占引用；推理只需共享引用，可在多个线程中同时调用。
pub struct InferEngine {
  task: TaskKind,
  backend: Arc<dyn ModelBackend>,
  registry: ModuleRegistry,
  assets: Option<LoadedAssets>,
}

impl InferEngine {
  pub fn builder(task: TaskKind) -> InferEngineBuilder {
    InferEngineBuilder {
      task,
      backend: None,
      registry: None,
    }
  }

  pub fn task(&self) -> TaskKind {
    self.task
  }

  pub fn is_loaded(&self) -> bool {
    self.assets.is_some()
  }

  /// 读取配置文件并初始化全部模块，失败时不保留任何状态
  pub fn load_resources(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
    self.assets = None;
    let spec = PipelineSpec::load(path.as_ref()).inspect_err(|e| {
      error!("加载资源失败: {} ({})", e, e.status());
    })?;
    self.load_spec(spec)
  }

  /// 使用已解析的配置初始化模块
  pub fn load_spec(&mut self, spec: PipelineSpec) -> Result<(), EngineError> {
    self.assets = None;
    spec.validate()?;
    let modules = self.build_modules(&spec).inspect_err(|e| {
      error!("加载资源失败: {} ({})", e, e.status());
    })?;
    info!("资源加载完成, 共 {} 个模块", modules.len());
    self.assets = Some(LoadedAssets { spec, modules });
    Ok(())
  }

  fn build_modules(&self, spec: &PipelineSpec) -> Result<ModuleMap, EngineError> {
    let mut modules = ModuleMap::new();
    for model_id in spec.referenced_modules() {
      let module_spec = spec.modules.get(model_id).ok_or_else(|| {
        info!("配置中未找到模块 {}", model_id);
        EngineError::not_found(format!("模块 {}", model_id))
      })?;
      info!("加载模块: {} ({})", model_id, module_spec.class);

      let mut module = self.registry.create(&module_spec.class);
      match module.task() {
        Some(task) if task != self.task => {
          return Err(EngineError::input_invalid(format!(
            "模块 {} 的任务类别 {} 与引擎 {} 不一致",
            model_id, task, self.task
          )));
        }
        _ => {}
      }
      module.init(&module_spec.init_params, self.backend.as_ref())?;
      modules.insert(model_id.to_string(), module);
    }
    Ok(modules)
  }

  /// 释放已加载的模块与模型
  pub fn clear_resources(&mut self) -> Result<(), EngineError> {
    if self.assets.take().is_some() {
      info!("已释放推理资源");
    }
    Ok(())
  }

  /// 对每个 ROI 执行 main 块，单个 ROI 失败不影响其它 ROI
  pub fn infer_sync(&self, image: &RgbImage, request: &InferRequest) -> Result<InferResult, EngineError> {
    debug!("开始同步推理");
    let assets = match &self.assets {
      Some(assets) if !assets.modules.is_empty() => assets,
      _ => {
        error!("请先加载资源");
        return Err(EngineError::WrongState);
      }
    };
    if image.width() == 0 || image.height() == 0 {
      error!("输入图像为空");
      return Err(EngineError::input_invalid("输入图像为空"));
    }
    if request.task() != self.task {
      return Err(EngineError::input_invalid(format!(
        "请求类别 {} 与引擎 {} 不一致",
        request.task(),
        self.task
      )));
    }
    let rois = request.rois();
    if rois.is_empty() {
      error!("ROI 为空，请提供有效的 ROI");
      return Err(EngineError::input_invalid("ROI 为空"));
    }

    let (img_w, img_h) = image.dimensions();
    let mut result = InferResult::with_slots(self.task, rois.len());
    let mut succeeded = 0usize;

    for (index, roi) in rois.iter().enumerate() {
      let Some(rect) = roi.rect_within(img_w, img_h) else {
        error!("第 {} 个 ROI 超出图像范围: {:?}", index, roi);
        continue;
      };
      let crop =
        image::imageops::crop_imm(image, rect.left, rect.top, rect.width, rect.height).to_image();

      let mut ctx = ExecutionContext::new(&crop, request);
      if let Err(e) = graph::execute(&assets.spec, MAIN_BLOCK, &assets.modules, &mut ctx) {
        warn!("第 {} 个 ROI 推理失败: {} ({})", index, e, e.status());
        continue;
      }

      let mut output = ctx.output;
      output.sort_by(request.sort_method());
      if let Some(max_num) = request.max_num() {
        output.truncate(max_num);
      }
      output.translate(rect.left as i32, rect.top as i32);
      debug!("第 {} 个 ROI 得到 {} 个结果", index, output.len());
      result.fill_slot(index, output);
      succeeded += 1;
    }

    if succeeded == 0 {
      info!("所有 ROI 均未得到有效结果");
      return Err(EngineError::output_invalid("所有 ROI 均未得到有效结果"));
    }
    Ok(result)
  }
}
