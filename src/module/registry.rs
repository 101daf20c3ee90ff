// 该文件是 Tianshu （天枢） 项目的一部分。
// src/module/registry.rs - 模块注册表
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

use std::{collections::BTreeMap, sync::Arc};

use tracing::{debug, warn};

use super::{EmptyModule, InferModule, ProcessingModule};

pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn ProcessingModule> + Send + Sync>;

/// 类名到模块工厂的映射
#[derive(Clone)]
pub struct ModuleRegistry {
  factories: BTreeMap<String, ModuleFactory>,
}

impl std::fmt::Debug for ModuleRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleRegistry")
      .field("classes", &self.factories.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl Default for ModuleRegistry {
  fn default() -> Self {
    Self::with_builtin()
  }
}

impl ModuleRegistry {
  /// 空注册表
  pub fn new() -> Self {
    Self {
      factories: BTreeMap::new(),
    }
  }

  /// 注册内置模块
  pub fn with_builtin() -> Self {
    let mut registry = Self::new();
    registry
      .register(InferModule::YOLO_DETECT, || Box::new(InferModule::yolo_detect()))
      .register(InferModule::YOLO_LETTERBOX_DETECT, || {
        Box::new(InferModule::yolo_letterbox_detect())
      })
      .register(InferModule::YOLO_SEGMENT, || Box::new(InferModule::yolo_segment()))
      .register(EmptyModule::CLASS_NAME, || Box::new(EmptyModule::default()));
    registry
  }

  /// 注册类名，重复注册时覆盖旧的工厂
  pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn() -> Box<dyn ProcessingModule> + Send + Sync + 'static,
  {
    let name = name.into();
    if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
      debug!("模块类 {} 已存在，覆盖注册", name);
    }
    self
  }

  pub fn contains(&self, name: &str) -> bool {
    self.factories.contains_key(name)
  }

  pub fn class_names(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  /// 创建模块实例，未注册的类名返回空模块
  pub fn create(&self, name: &str) -> Box<dyn ProcessingModule> {
    match self.factories.get(name) {
      Some(factory) => factory(),
      None => {
        warn!("模块类 {} 未注册，使用空模块代替", name);
        Box::new(EmptyModule::default())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::request::TaskKind;

  #[test]
  fn builtin_classes_are_registered() {
    let registry = ModuleRegistry::with_builtin();
    assert!(registry.contains("YoloDetectModule"));
    assert!(registry.contains("YoloLetterboxDetectModule"));
    assert!(registry.contains("YoloSegmentModule"));
    assert_eq!(
      registry.create("YoloSegmentModule").task(),
      Some(TaskKind::Segment)
    );
  }

  #[test]
  fn unknown_class_falls_back_to_empty_module() {
    let registry = ModuleRegistry::with_builtin();
    let module = registry.create("NoSuchModule");
    assert_eq!(module.class_name(), EmptyModule::CLASS_NAME);
    assert_eq!(module.task(), None);
  }

  #[test]
  fn register_replaces_existing_factory() {
    let mut registry = ModuleRegistry::new();
    registry.register("Custom", || Box::new(InferModule::yolo_detect()));
    registry.register("Custom", || Box::new(InferModule::yolo_segment()));
    assert_eq!(registry.class_names().count(), 1);
    assert_eq!(registry.create("Custom").task(), Some(TaskKind::Segment));
  }
}
