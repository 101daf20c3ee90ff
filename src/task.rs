// 该文件是 Tianshu （天枢） 项目的一部分。
// src/task.rs - 推理任务驱动
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  engine::InferEngine,
  output::Render,
  request::{DetectRequest, InferRequest, Roi, SegmentRequest, TaskKind},
  result::InferResult,
  status::EngineError,
};

/// 单帧推理
pub trait Infer {
  type Input;
  type Output;
  type Error;
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 引擎与请求的组合；未提供请求时对整幅图像推理
pub struct EngineJob<'a> {
  engine: &'a InferEngine,
  request: Option<InferRequest>,
}

impl<'a> EngineJob<'a> {
  pub fn new(engine: &'a InferEngine, request: Option<InferRequest>) -> Self {
    Self { engine, request }
  }
}

/// 覆盖整幅图像的默认请求
pub fn full_image_request(task: TaskKind, width: u32, height: u32) -> InferRequest {
  let rois = vec![Roi::full_image(width, height)];
  match task {
    TaskKind::Detect => DetectRequest {
      rois,
      ..Default::default()
    }
    .into(),
    TaskKind::Segment => SegmentRequest {
      rois,
      ..Default::default()
    }
    .into(),
  }
}

impl Infer for EngineJob<'_> {
  type Input = RgbImage;
  type Output = InferResult;
  type Error = EngineError;

  fn infer(&self, input: &RgbImage) -> Result<InferResult, EngineError> {
    match &self.request {
      Some(request) => self.engine.infer_sync(input, request),
      None => {
        let request = full_image_request(self.engine.task(), input.width(), input.height());
        self.engine.infer_sync(input, &request)
      }
    }
  }
}

impl<T: Infer + ?Sized> Infer for &T {
  type Input = T::Input;
  type Output = T::Output;
  type Error = T::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Infer<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复推理并统计平均耗时，前若干次作为预热不计入
#[derive(Debug, Clone)]
pub struct RepeatShotTask {
  repeat: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 10,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }

  /// 去掉预热后的平均耗时，样本不足时使用全部样本
  pub fn average(&self, times: &[Duration]) -> Option<Duration> {
    let measured = if times.len() > self.warmup {
      &times[self.warmup..]
    } else {
      times
    };
    if measured.is_empty() {
      return None;
    }
    Some(measured.iter().sum::<Duration>() / measured.len() as u32)
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Infer<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handler_stop.store(true, Ordering::SeqCst);
    }) {
      warn!("无法注册中断信号处理: {}", e);
    }

    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      if i + 1 == self.repeat {
        output.render_result(&frame, &result)?;
      }
      if stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    if let Some(average) = self.average(&times) {
      warn!("平均推理时间: {:.2?} ({} 次)", average, times.len());
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  struct Counting {
    calls: Cell<usize>,
  }

  impl Infer for Counting {
    type Input = u32;
    type Output = u32;
    type Error = std::io::Error;

    fn infer(&self, input: &u32) -> Result<u32, Self::Error> {
      self.calls.set(self.calls.get() + 1);
      Ok(input * 2)
    }
  }

  struct Collect {
    rendered: Cell<Option<u32>>,
  }

  impl Render<u32, u32> for &Collect {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), Self::Error> {
      self.rendered.set(Some(*result));
      Ok(())
    }
  }

  #[test]
  fn one_shot_renders_first_frame() {
    let model = Counting { calls: Cell::new(0) };
    let output = Collect {
      rendered: Cell::new(None),
    };
    OneShotTask
      .run_task(vec![3u32, 4].into_iter(), &model, &output)
      .expect("task");
    assert_eq!(output.rendered.get(), Some(6));
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let model = Counting { calls: Cell::new(0) };
    let output = Collect {
      rendered: Cell::new(None),
    };
    assert!(
      OneShotTask
        .run_task(Vec::<u32>::new().into_iter(), &model, &output)
        .is_err()
    );
  }

  #[test]
  fn repeat_shot_runs_requested_times() {
    let model = Counting { calls: Cell::new(0) };
    let output = Collect {
      rendered: Cell::new(None),
    };
    RepeatShotTask::default()
      .with_repeat(5)
      .run_task(vec![1u32].into_iter(), &model, &output)
      .expect("task");
    assert_eq!(model.calls.get(), 5);
    assert_eq!(output.rendered.get(), Some(2));
  }

  #[test]
  fn average_skips_warmup() {
    let task = RepeatShotTask::default().with_warmup(2);
    let times = [100, 100, 10, 20].map(Duration::from_millis);
    assert_eq!(task.average(&times), Some(Duration::from_millis(15)));
    assert_eq!(
      task.average(&times[..1]),
      Some(Duration::from_millis(100))
    );
    assert_eq!(task.average(&[]), None);
  }

  #[test]
  fn full_image_request_matches_task() {
    let request = full_image_request(TaskKind::Segment, 64, 32);
    assert_eq!(request.task(), TaskKind::Segment);
    assert_eq!(request.rois(), &[Roi::full_image(64, 32)]);
  }
}
