// 该文件是 Tianshu （天枢） 项目的一部分。
// src/postprocess/nms.rs - 候选框排序与非极大值抑制
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

use super::Proposal;

/// 超过该长度的区间才把两侧分给 rayon 并行排序
const PARALLEL_SORT_THRESHOLD: usize = 2048;

/// 两个 [x_min, y_min, x_max, y_max] 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 以中间元素为枢轴划分，返回 (左区间长度, 右区间起点)
fn partition(items: &mut [Proposal]) -> (usize, usize) {
  let pivot = items[(items.len() - 1) / 2].score;
  let mut i: isize = 0;
  let mut j: isize = items.len() as isize - 1;

  while i <= j {
    while items[i as usize].score > pivot {
      i += 1;
    }
    while items[j as usize].score < pivot {
      j -= 1;
    }
    if i <= j {
      items.swap(i as usize, j as usize);
      i += 1;
      j -= 1;
    }
  }
  ((j + 1) as usize, i as usize)
}

/// 按分数降序原地快速排序，不保证稳定
pub fn sort_by_score(items: &mut [Proposal]) {
  if items.len() < 2 {
    return;
  }
  let len = items.len();
  let (left_len, right_start) = partition(items);
  let (head, tail) = items.split_at_mut(right_start);
  let left = &mut head[..left_len];

  if len >= PARALLEL_SORT_THRESHOLD {
    rayon::join(|| sort_by_score(left), || sort_by_score(tail));
  } else {
    sort_by_score(left);
    sort_by_score(tail);
  }
}

/// 贪心 NMS：与已保留的同类框 IoU 大于阈值的候选框被丢弃
///
/// 输入需已按分数降序排列，返回保留的下标。
pub fn non_max_suppression(proposals: &[Proposal], iou_threshold: f32) -> Vec<usize> {
  let mut picked: Vec<usize> = Vec::new();
  for (i, candidate) in proposals.iter().enumerate() {
    let suppressed = picked.iter().any(|&k| {
      let kept = &proposals[k];
      kept.class_id == candidate.class_id && iou(&candidate.bbox, &kept.bbox) > iou_threshold
    });
    if !suppressed {
      picked.push(i);
    }
  }
  picked
}
