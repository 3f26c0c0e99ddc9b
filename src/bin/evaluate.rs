// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/bin/evaluate.rs - 验证坑洼检测模型
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pothole::{
  Checkpoint, DetectorBuilder,
  model::{Backend, DEFAULT_YOLO_PROGRAM},
  task::{EvaluateTask, Task},
};

/// 在模型自带的数据集配置上验证，输出精确率、召回率与 mAP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练好的权重文件
  #[arg(long, default_value = "runs/detect/train/weights/best.pt", value_name = "MODEL")]
  pub model: PathBuf,
  /// 以 JSON 输出完整报告
  #[arg(long)]
  pub json: bool,
  /// 检测库命令行程序
  #[arg(long, default_value = DEFAULT_YOLO_PROGRAM, value_name = "PROGRAM")]
  pub yolo: String,
}

fn main() -> Result<()> {
  // 标准输出只留给结果（--json 报告、结果目录），日志写到标准错误
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());

  let checkpoint = Checkpoint::open(&args.model)?;
  let model = DetectorBuilder::from_checkpoint(&checkpoint)
    // ONNX Runtime 只做推理，训练和验证（包括 .onnx 权重）都交给检测库
    .backend(Backend::Ultralytics)
    .yolo_program(args.yolo)
    .build()?;

  let report = EvaluateTask.run_task(&model)?;

  if args.json {
    println!(
      "{}",
      serde_json::to_string_pretty(&report).context("无法序列化验证报告")?
    );
    return Ok(());
  }

  println!("{}", report);
  if let Some(confusion_matrix) = &report.confusion_matrix {
    println!("Confusion matrix: {}", confusion_matrix.display());
  }

  Ok(())
}
