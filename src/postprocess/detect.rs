// 该文件是 Tianshu （天枢） 项目的一部分。
// src/postprocess/detect.rs - YOLO 检测输出解码
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

use ndarray::ArrayD;
use tracing::{debug, info};

use super::{ClassTable, DecodeParams, ProposalTensor, ResizeMode, rank_and_suppress, tensor_data};
use crate::{result::RotateBox, status::EngineError};

/// 解码 `[1, 4 + 类别数 + 额外通道, N]` 的检测输出，坐标映射回原图并裁剪到图像范围
pub fn decode_detections(
  output: &ArrayD<f32>,
  classes: &ClassTable,
  mode: ResizeMode,
  params: &DecodeParams,
) -> Result<Vec<RotateBox>, EngineError> {
  if classes.is_empty() {
    info!("类别配置为空，跳过解码");
    return Err(EngineError::input_invalid("类别配置为空"));
  }
  let num_classes = classes.len();
  debug!("类别数量: {}", num_classes);

  let (data, shape) = tensor_data(output);
  let tensor = ProposalTensor::new(&data, &shape, num_classes)?;
  let transform = mode.transform(params.image_size, params.input_size);
  let proposals = tensor.collect(
    num_classes,
    0,
    params.thresholds.conf,
    &transform,
    Some(params.image_size),
  );
  if proposals.is_empty() {
    info!("未检测到目标");
    return Err(EngineError::output_invalid("未检测到目标"));
  }

  let kept = rank_and_suppress(proposals, params.thresholds.iou);
  if kept.is_empty() {
    info!("未检测到目标");
    return Err(EngineError::output_invalid("未检测到目标"));
  }
  debug!("NMS 后保留 {} 个目标", kept.len());

  Ok(
    kept
      .into_iter()
      .map(|p| RotateBox::from_corners(p.bbox, p.score, p.class_id, classes.name(p.class_id)))
      .collect(),
  )
}
