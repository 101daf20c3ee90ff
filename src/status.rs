// 该文件是 Tianshu （天枢） 项目的一部分。
// src/status.rs - 状态码与错误定义
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

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelError;

/// 对外暴露的状态码，数值保持稳定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
  Success = 0,
  InitLogFailed = 1,
  WrongState = 2,
  LoadModelFailed = 3,
  InputInvalid = 4,
  OutputInvalid = 5,
  NotFound = 6,
  RunInferFailed = 7,
  ReadFileFailed = 8,
  UnknownError = 9,
}

impl Status {
  pub fn code(self) -> u8 {
    self as u8
  }

  pub fn is_success(self) -> bool {
    self == Status::Success
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Status::Success => "Success",
      Status::InitLogFailed => "InitLogFailed",
      Status::WrongState => "WrongState",
      Status::LoadModelFailed => "LoadModelFailed",
      Status::InputInvalid => "InputInvalid",
      Status::OutputInvalid => "OutputInvalid",
      Status::NotFound => "NotFound",
      Status::RunInferFailed => "RunInferFailed",
      Status::ReadFileFailed => "ReadFileFailed",
      Status::UnknownError => "UnknownError",
    };
    write!(f, "{}({})", name, self.code())
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("日志初始化失败: {0}")]
  InitLogFailed(String),
  #[error("请先加载资源")]
  WrongState,
  #[error("模型加载失败: {0}")]
  LoadModelFailed(#[from] ModelError),
  #[error("输入无效: {0}")]
  InputInvalid(String),
  #[error("输出无效: {0}")]
  OutputInvalid(String),
  #[error("未找到: {0}")]
  NotFound(String),
  #[error("推理执行失败: {0}")]
  RunInferFailed(String),
  #[error("读取文件 {path} 失败: {source}")]
  ReadFileFailed {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl EngineError {
  pub fn status(&self) -> Status {
    match self {
      EngineError::InitLogFailed(_) => Status::InitLogFailed,
      EngineError::WrongState => Status::WrongState,
      EngineError::LoadModelFailed(_) => Status::LoadModelFailed,
      EngineError::InputInvalid(_) => Status::InputInvalid,
      EngineError::OutputInvalid(_) => Status::OutputInvalid,
      EngineError::NotFound(_) => Status::NotFound,
      EngineError::RunInferFailed(_) => Status::RunInferFailed,
      EngineError::ReadFileFailed { .. } => Status::ReadFileFailed,
    }
  }

  pub fn input_invalid(msg: impl Into<String>) -> Self {
    EngineError::InputInvalid(msg.into())
  }

  pub fn output_invalid(msg: impl Into<String>) -> Self {
    EngineError::OutputInvalid(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    EngineError::NotFound(msg.into())
  }

  pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    EngineError::ReadFileFailed {
      path: path.into(),
      source,
    }
  }
}

/// 将结果折叠为状态码，便于与状态码风格的调用方对接
pub fn status_of<T>(result: &Result<T, EngineError>) -> Status {
  match result {
    Ok(_) => Status::Success,
    Err(e) => e.status(),
  }
}
