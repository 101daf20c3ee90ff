// 该文件是 Tianshu （天枢） 项目的一部分。
// src/graph.rs - 流水线配置与图执行
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

use std::{
  collections::{BTreeMap, BTreeSet},
  panic::{AssertUnwindSafe, catch_unwind},
  path::Path,
};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::{
  module::ModuleMap,
  request::InferRequest,
  result::TaskOutput,
  status::EngineError,
};

/// 图执行的入口块
pub const MAIN_BLOCK: &str = "main";
/// 块嵌套的最大深度
pub const MAX_GRAPH_DEPTH: usize = 32;

/// 模块声明
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleSpec {
  pub class: String,
  #[serde(default)]
  pub init_params: serde_json::Value,
}

/// 图节点
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum GraphNode {
  Run {
    model_id: String,
  },
  /// 按 `expr` 的取值进入键相同的块
  Switch {
    expr: String,
    #[serde(default)]
    blocks: BTreeMap<String, String>,
  },
}

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
  Json,
  Yaml,
}

impl DocumentFormat {
  /// 根据扩展名判断
  pub fn from_path(path: &Path) -> Result<Self, EngineError> {
    let extension = path
      .extension()
      .and_then(|e| e.to_str())
      .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
      Some("json") => Ok(DocumentFormat::Json),
      Some("yaml") | Some("yml") => Ok(DocumentFormat::Yaml),
      _ => Err(EngineError::input_invalid(format!(
        "不支持的配置文件格式: {}",
        path.display()
      ))),
    }
  }
}

/// 解析后的流水线配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineSpec {
  pub modules: BTreeMap<String, ModuleSpec>,
  pub graph: BTreeMap<String, Vec<GraphNode>>,
}

impl PipelineSpec {
  /// 读取并解析配置文件
  pub fn load(path: &Path) -> Result<Self, EngineError> {
    let format = DocumentFormat::from_path(path)?;
    info!("读取配置文件: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::read_file(path, e))?;
    Self::parse(&content, format)
  }

  pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, EngineError> {
    let spec: PipelineSpec = match format {
      DocumentFormat::Json => serde_json::from_str(content)
        .map_err(|e| EngineError::input_invalid(format!("JSON 配置解析失败: {}", e)))?,
      DocumentFormat::Yaml => serde_yaml::from_str(content)
        .map_err(|e| EngineError::input_invalid(format!("YAML 配置解析失败: {}", e)))?,
    };
    spec.validate()?;
    Ok(spec)
  }

  /// 检查入口、引用与环
  pub fn validate(&self) -> Result<(), EngineError> {
    if !self.graph.contains_key(MAIN_BLOCK) {
      return Err(EngineError::input_invalid("图中缺少 main 块"));
    }
    for (block, nodes) in &self.graph {
      for node in nodes {
        match node {
          GraphNode::Run { model_id } => {
            if !self.modules.contains_key(model_id) {
              error!("块 {} 引用的模块 {} 未声明", block, model_id);
              return Err(EngineError::not_found(format!("模块 {}", model_id)));
            }
          }
          GraphNode::Switch { blocks, .. } => {
            if let Some(target) = blocks.values().find(|t| !self.graph.contains_key(*t)) {
              error!("块 {} 的分支目标 {} 不存在", block, target);
              return Err(EngineError::not_found(format!("块 {}", target)));
            }
          }
        }
      }
    }

    let mut visiting = Vec::new();
    let mut done = BTreeSet::new();
    self.check_cycles(MAIN_BLOCK, &mut visiting, &mut done)
  }

  fn check_cycles<'a>(
    &'a self,
    block: &'a str,
    visiting: &mut Vec<&'a str>,
    done: &mut BTreeSet<&'a str>,
  ) -> Result<(), EngineError> {
    if done.contains(block) {
      return Ok(());
    }
    if visiting.contains(&block) {
      return Err(EngineError::input_invalid(format!(
        "图中存在环: {} -> {}",
        visiting.join(" -> "),
        block
      )));
    }
    if visiting.len() >= MAX_GRAPH_DEPTH {
      return Err(EngineError::input_invalid(format!(
        "块嵌套超过 {} 层",
        MAX_GRAPH_DEPTH
      )));
    }
    visiting.push(block);
    for node in self.graph.get(block).into_iter().flatten() {
      if let GraphNode::Switch { blocks, .. } = node {
        for target in blocks.values() {
          self.check_cycles(target, visiting, done)?;
        }
      }
    }
    visiting.pop();
    done.insert(block);
    Ok(())
  }

  /// 从 main 可达的 `Run` 节点引用的模块编号，按首次出现的顺序
  pub fn referenced_modules(&self) -> Vec<&str> {
    let mut order = Vec::new();
    let mut seen_blocks = BTreeSet::new();
    let mut pending = vec![MAIN_BLOCK];
    while let Some(block) = pending.pop() {
      if !seen_blocks.insert(block) {
        continue;
      }
      let mut nested = Vec::new();
      for node in self.graph.get(block).into_iter().flatten() {
        match node {
          GraphNode::Run { model_id } => {
            if !order.contains(&model_id.as_str()) {
              order.push(model_id.as_str());
            }
          }
          GraphNode::Switch { blocks, .. } => nested.extend(blocks.values().map(String::as_str)),
        }
      }
      pending.extend(nested.into_iter().rev());
    }
    order
  }
}

/// 单个 ROI 的执行上下文
pub struct ExecutionContext<'a> {
  /// 裁剪后的 ROI 图像
  pub image: &'a RgbImage,
  pub request: &'a InferRequest,
  /// 裁剪图坐标系下累积的结果
  pub output: TaskOutput,
}

impl<'a> ExecutionContext<'a> {
  pub fn new(image: &'a RgbImage, request: &'a InferRequest) -> Self {
    Self {
      image,
      request,
      output: TaskOutput::empty(request.task()),
    }
  }

  /// Switch 表达式的取值
  pub fn selector(&self, expr: &str) -> Option<&str> {
    self.request.selectors().get(expr).map(String::as_str)
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知错误".to_string()
  }
}

/// 顺序深度优先执行一个块，首个失败即中止
pub fn execute(
  spec: &PipelineSpec,
  block: &str,
  modules: &ModuleMap,
  ctx: &mut ExecutionContext<'_>,
) -> Result<(), EngineError> {
  execute_at(spec, block, modules, ctx, 0)
}

fn execute_at(
  spec: &PipelineSpec,
  block: &str,
  modules: &ModuleMap,
  ctx: &mut ExecutionContext<'_>,
  depth: usize,
) -> Result<(), EngineError> {
  if depth >= MAX_GRAPH_DEPTH {
    return Err(EngineError::input_invalid(format!(
      "块嵌套超过 {} 层",
      MAX_GRAPH_DEPTH
    )));
  }
  let nodes = spec
    .graph
    .get(block)
    .ok_or_else(|| EngineError::not_found(format!("块 {}", block)))?;
  debug!("执行块 {}", block);

  for node in nodes {
    match node {
      GraphNode::Run { model_id } => {
        let module = modules
          .get(model_id)
          .ok_or_else(|| EngineError::not_found(format!("模块 {}", model_id)))?;
        debug!("运行模块 {}", model_id);
        let result = catch_unwind(AssertUnwindSafe(|| module.run(ctx)));
        match result {
          Ok(Ok(())) => {}
          Ok(Err(e)) => {
            info!("模块 {} 运行失败: {}", model_id, e);
            return Err(e);
          }
          Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("模块 {} 运行异常: {}", model_id, message);
            return Err(EngineError::RunInferFailed(message));
          }
        }
      }
      GraphNode::Switch { expr, blocks } => {
        let Some(value) = ctx.selector(expr).map(str::to_owned) else {
          debug!("Switch {} 没有取值，跳过", expr);
          continue;
        };
        debug!("Switch {} = {}", expr, value);
        for (key, target) in blocks {
          if *key == value {
            execute_at(spec, target, modules, ctx, depth + 1).inspect_err(|_| {
              info!("执行块 {} 失败", target);
            })?;
          }
        }
      }
    }
  }
  Ok(())
}
