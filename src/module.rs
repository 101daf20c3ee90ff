// 该文件是 Tianshu （天枢） 项目的一部分。
// src/module.rs - 处理模块接口
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::{graph::ExecutionContext, model::ModelBackend, request::TaskKind, status::EngineError};

pub mod infer_module;
pub mod registry;

pub use self::{
  infer_module::{Decoder, InferModule, InferModuleParams, ModuleCfgs},
  registry::{ModuleFactory, ModuleRegistry},
};

/// 模块编号到已初始化模块的映射
pub type ModuleMap = BTreeMap<String, Box<dyn ProcessingModule>>;

/// 图中 `Run` 节点调用的处理单元
pub trait ProcessingModule: Send + Sync {
  /// 注册时使用的类名
  fn class_name(&self) -> &str;

  /// 模块产出的任务类别，`None` 表示不产出结果，可用于任何任务
  fn task(&self) -> Option<TaskKind>;

  /// 加载资源时调用一次
  fn init(&mut self, params: &serde_json::Value, backend: &dyn ModelBackend) -> Result<(), EngineError>;

  /// 对单个 ROI 执行，结果追加到上下文
  fn run(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError>;
}

/// 空模块，未注册的类名会回落到它
#[derive(Debug, Clone, Default)]
pub struct EmptyModule {
  cfgs: serde_json::Value,
}

impl EmptyModule {
  pub const CLASS_NAME: &'static str = "EmptyModule";
}

impl ProcessingModule for EmptyModule {
  fn class_name(&self) -> &str {
    Self::CLASS_NAME
  }

  fn task(&self) -> Option<TaskKind> {
    None
  }

  fn init(&mut self, params: &serde_json::Value, _backend: &dyn ModelBackend) -> Result<(), EngineError> {
    self.cfgs = params.get("cfgs").cloned().unwrap_or_default();
    debug!("空模块初始化, cfgs: {}", self.cfgs);
    Ok(())
  }

  fn run(&self, _ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
    Ok(())
  }
}
