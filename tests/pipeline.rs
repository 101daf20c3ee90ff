// 该文件是 Tianshu （天枢） 项目的一部分。
// tests/pipeline.rs - 配置加载、图执行与生命周期测试
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

mod common;

use std::collections::BTreeMap;

use common::*;
use tianshu::{DetectRequest, InferRequest, Roi, Status, TaskKind};

const RED: [u8; 3] = [255, 0, 0];

fn full_request(width: u32, height: u32) -> InferRequest {
  DetectRequest {
    rois: vec![Roi::full_image(width, height)],
    ..Default::default()
  }
  .into()
}

fn scene() -> image::RgbImage {
  image_with_rects(160, 120, &[([40, 30, 80, 60], RED)])
}

#[test]
fn yaml_config_is_equivalent_to_json() {
  let ws = Workspace::new();
  let model = ws.model("det.model", "detect 320 240");
  let yaml = format!(
    r#"
modules:
  det:
    class: YoloDetectModule
    init_params:
      model_path: [{model:?}]
      id_cfgs:
        "0": scratch
graph:
  main:
    - type: Run
      model_id: det
"#,
    model = model.display().to_string()
  );
  let config = ws.config("pipeline.yaml", &yaml);
  let engine = loaded_engine(TaskKind::Detect, &config);

  let result = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect("inference");
  assert_eq!(result.slot_len(0), 1);
}

#[test]
fn load_errors_report_their_status() {
  let ws = Workspace::new();
  let mut engine = engine(TaskKind::Detect);

  let err = engine
    .load_resources(ws.path("missing.json"))
    .expect_err("missing file");
  assert_eq!(err.status(), Status::ReadFileFailed);

  let config = ws.config("pipeline.txt", "{}");
  let err = engine.load_resources(&config).expect_err("bad extension");
  assert_eq!(err.status(), Status::InputInvalid);

  let config = ws.config("broken.json", "{ not json");
  let err = engine.load_resources(&config).expect_err("bad document");
  assert_eq!(err.status(), Status::InputInvalid);

  let config = ws.config(
    "unknown_module.json",
    r#"{"modules": {}, "graph": {"main": [{"type": "Run", "model_id": "ghost"}]}}"#,
  );
  let err = engine.load_resources(&config).expect_err("unknown module");
  assert_eq!(err.status(), Status::NotFound);

  let config = ws.config(
    "cycle.json",
    r#"{"modules": {},
        "graph": {
          "main": [{"type": "Switch", "expr": "k", "blocks": {"a": "loop"}}],
          "loop": [{"type": "Switch", "expr": "k", "blocks": {"a": "main"}}]
        }}"#,
  );
  let err = engine.load_resources(&config).expect_err("cycle");
  assert_eq!(err.status(), Status::InputInvalid);
  assert!(!engine.is_loaded());
}

#[test]
fn model_errors_fail_loading() {
  let ws = Workspace::new();
  let mut engine = engine(TaskKind::Detect);

  let garbage = ws.model("garbage.model", "not a model");
  let config = ws.config(
    "garbage.json",
    &single_module_config("YoloDetectModule", &garbage, ""),
  );
  let err = engine.load_resources(&config).expect_err("invalid model");
  assert_eq!(err.status(), Status::LoadModelFailed);

  let config = ws.config(
    "absent.json",
    &single_module_config("YoloDetectModule", &ws.path("absent.model"), ""),
  );
  let err = engine.load_resources(&config).expect_err("absent model");
  assert_eq!(err.status(), Status::ReadFileFailed);

  let model = ws.model("det.model", "detect 320 240");
  let config = ws.config(
    "bad_device.json",
    &single_module_config("YoloDetectModule", &model, r#""device": "tpu""#),
  );
  let err = engine.load_resources(&config).expect_err("unknown device");
  assert_eq!(err.status(), Status::InputInvalid);
  assert!(!engine.is_loaded());
}

#[test]
fn unregistered_class_runs_as_no_op() {
  let ws = Workspace::new();
  let config = ws.config(
    "noop.json",
    r#"{"modules": {"x": {"class": "FancyModule", "init_params": {"cfgs": {"k": 1}}}},
        "graph": {"main": [{"type": "Run", "model_id": "x"}]}}"#,
  );
  let engine = loaded_engine(TaskKind::Detect, &config);
  let result = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect("no-op succeeds");
  assert_eq!(result.slot_count(), 1);
  assert_eq!(result.slot_len(0), 0);
}

#[test]
fn empty_class_table_fails_the_roi() {
  let ws = Workspace::new();
  let model = ws.model("det.model", "detect 320 240");
  let config = ws.config(
    "no_classes.json",
    &format!(
      r#"{{"modules": {{"m": {{"class": "YoloDetectModule",
                              "init_params": {{"model_path": [{:?}]}}}}}},
          "graph": {{"main": [{{"type": "Run", "model_id": "m"}}]}}}}"#,
      model.display().to_string()
    ),
  );
  let engine = loaded_engine(TaskKind::Detect, &config);
  let err = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect_err("no classes");
  assert_eq!(err.status(), Status::OutputInvalid);
}

#[test]
fn panicking_module_is_contained() {
  let ws = Workspace::new();
  let model = ws.model("panic.model", "panic");
  let config = ws.config(
    "panic.json",
    &single_module_config("YoloDetectModule", &model, ""),
  );
  let engine = loaded_engine(TaskKind::Detect, &config);

  let err = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect_err("module panicked");
  assert_eq!(err.status(), Status::OutputInvalid);
  // 引擎在异常后仍可继续使用
  let err = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect_err("module panicked again");
  assert_eq!(err.status(), Status::OutputInvalid);
}

fn switch_config(ws: &Workspace) -> std::path::PathBuf {
  let model = ws.model("det.model", "detect 320 240");
  let model = format!("{:?}", model.display().to_string());
  ws.config(
    "switch.json",
    &format!(
      r#"{{
        "modules": {{
          "coarse": {{"class": "YoloDetectModule",
                      "init_params": {{"model_path": [{model}], "id_cfgs": {{"0": "coarse-scratch"}}}}}},
          "fine": {{"class": "YoloDetectModule",
                    "init_params": {{"model_path": [{model}], "id_cfgs": {{"0": "fine-scratch"}}}}}}
        }},
        "graph": {{
          "main": [{{"type": "Switch", "expr": "surface",
                     "blocks": {{"rough": "coarse_block", "polished": "fine_block", "both": "both_block"}}}}],
          "coarse_block": [{{"type": "Run", "model_id": "coarse"}}],
          "fine_block": [{{"type": "Run", "model_id": "fine"}}],
          "both_block": [{{"type": "Run", "model_id": "coarse"}}, {{"type": "Run", "model_id": "fine"}}]
        }}
      }}"#,
      model = model
    ),
  )
}

fn with_selector(value: Option<&str>) -> InferRequest {
  let mut selectors = BTreeMap::new();
  if let Some(value) = value {
    selectors.insert("surface".to_string(), value.to_string());
  }
  DetectRequest {
    rois: vec![Roi::full_image(160, 120)],
    selectors,
    ..Default::default()
  }
  .into()
}

#[test]
fn switch_selects_block_from_request() {
  let ws = Workspace::new();
  let engine = loaded_engine(TaskKind::Detect, &switch_config(&ws));

  let result = engine
    .infer_sync(&scene(), &with_selector(Some("polished")))
    .expect("fine branch");
  let names: Vec<&str> = result.boxes().expect("boxes")[0]
    .iter()
    .map(|b| b.class_name.as_str())
    .collect();
  assert_eq!(names, ["fine-scratch"]);

  let result = engine
    .infer_sync(&scene(), &with_selector(Some("both")))
    .expect("both branches");
  assert_eq!(result.slot_len(0), 2);

  // 没有匹配的分支时不运行任何模块
  let result = engine
    .infer_sync(&scene(), &with_selector(None))
    .expect("no branch");
  assert_eq!(result.slot_len(0), 0);
  let result = engine
    .infer_sync(&scene(), &with_selector(Some("matte")))
    .expect("unknown branch");
  assert_eq!(result.slot_len(0), 0);
}

#[test]
fn clear_and_reload_resources() {
  let ws = Workspace::new();
  let model = ws.model("det.model", "detect 320 240");
  let config = ws.config(
    "pipeline.json",
    &single_module_config("YoloDetectModule", &model, ""),
  );
  let mut engine = loaded_engine(TaskKind::Detect, &config);
  assert!(engine.is_loaded());

  engine.clear_resources().expect("clear");
  assert!(!engine.is_loaded());
  let err = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect_err("cleared");
  assert_eq!(err.status(), Status::WrongState);
  engine.clear_resources().expect("clear twice");

  engine.load_resources(&config).expect("reload");
  let result = engine
    .infer_sync(&scene(), &full_request(160, 120))
    .expect("inference after reload");
  assert_eq!(result.slot_len(0), 1);
}

#[test]
fn engine_is_shared_across_threads() {
  let ws = Workspace::new();
  let model = ws.model("det.model", "detect 320 240");
  let config = ws.config(
    "pipeline.json",
    &single_module_config("YoloDetectModule", &model, ""),
  );
  let engine = loaded_engine(TaskKind::Detect, &config);
  let image = scene();
  let request = full_request(160, 120);

  std::thread::scope(|s| {
    let handles: Vec<_> = (0..4)
      .map(|_| s.spawn(|| engine.infer_sync(&image, &request)))
      .collect();
    for handle in handles {
      let result = handle.join().expect("thread").expect("inference");
      assert_eq!(result.slot_len(0), 1);
    }
  });
}

#[test]
fn request_documents_deserialize() {
  let request: InferRequest = serde_json::from_str(
    r#"{"task": "detect", "rois": [{"x": 80, "y": 60, "width": 160, "height": 120}],
        "conf": 0.5, "max_num": 3, "sort_method": 1}"#,
  )
  .expect("detect request");
  assert_eq!(request.task(), TaskKind::Detect);
  assert_eq!(request.max_num(), Some(3));
  assert_eq!(request.rois(), &[Roi::full_image(160, 120)]);
}
