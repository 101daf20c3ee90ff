// 该文件是 Tianshu （天枢） 项目的一部分。
// src/logging.rs - 日志初始化
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

use std::{fs::OpenOptions, path::Path, sync::Mutex};

use tracing::info;

use crate::status::EngineError;

/// 将全局日志写入文件，以追加方式打开
///
/// 进程内只能安装一次全局订阅者，重复调用返回 `InitLogFailed`。
pub fn init_log(path: impl AsRef<Path>) -> Result<(), EngineError> {
  let path = path.as_ref();
  if path.as_os_str().is_empty() {
    return Err(EngineError::input_invalid("日志路径为空"));
  }
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .map_err(|e| EngineError::InitLogFailed(format!("无法创建日志目录: {}", e)))?;
  }
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(|e| EngineError::InitLogFailed(format!("无法打开日志文件: {}", e)))?;

  tracing_subscriber::fmt()
    .with_writer(Mutex::new(file))
    .with_ansi(false)
    .try_init()
    .map_err(|e| EngineError::InitLogFailed(e.to_string()))?;
  info!("日志写入 {}", path.display());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::Status;

  #[test]
  fn empty_path_is_input_invalid() {
    let err = init_log("").expect_err("empty path");
    assert_eq!(err.status(), Status::InputInvalid);
  }

  #[test]
  fn unwritable_path_fails_to_init() {
    let dir = tempfile::tempdir().expect("tempdir");
    // 目录本身无法作为日志文件打开
    let err = init_log(dir.path()).expect_err("directory");
    assert_eq!(err.status(), Status::InitLogFailed);
  }
}
