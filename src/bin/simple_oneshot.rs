// 该文件是 Tianshu （天枢） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use tianshu::{
  FromUrl, InferEngine, InferRequest, TaskKind,
  input::InputWrapper,
  output::OutputWrapper,
  task::{EngineJob, OneShotTask, Task},
};

/// Tianshu 单次推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 任务类别: detect 或 segment
  #[arg(long, value_name = "TASK")]
  pub task: TaskKind,
  /// 流水线配置文件（.json / .yaml）
  #[arg(long, value_name = "CONFIG")]
  pub config: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 请求文件（JSON），缺省对整幅图像推理
  #[arg(long, value_name = "REQUEST")]
  pub request: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件路径: {}", args.config.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let request = match &args.request {
    Some(path) => Some(serde_json::from_str::<InferRequest>(&std::fs::read_to_string(path)?)?),
    None => None,
  };

  let mut engine = InferEngine::builder(args.task).build()?;
  engine.load_resources(&args.config)?;

  let input_image = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input_image, EngineJob::new(&engine, request), output)?;

  engine.clear_resources()?;
  Ok(())
}
