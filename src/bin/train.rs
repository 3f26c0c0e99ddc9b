// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/bin/train.rs - 训练坑洼检测模型
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
  BaseModel, DetectorBuilder,
  model::{Backend, DEFAULT_YOLO_PROGRAM},
  task::{Task, TrainTask},
};

/// 训练坑洼检测模型（50 轮，图像尺寸 640，批大小 8）
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 基础模型，检测库会自动下载官方预训练权重
  #[arg(long, default_value = "yolov8n.pt", value_name = "MODEL")]
  pub model: PathBuf,
  /// 数据集描述文件
  #[arg(long, default_value = "Pothole_Dataset/data.yaml", value_name = "DATA")]
  pub data: PathBuf,
  /// 检测库命令行程序
  #[arg(long, default_value = DEFAULT_YOLO_PROGRAM, value_name = "PROGRAM")]
  pub yolo: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();

  info!("基础模型: {}", args.model.display());
  info!("数据集: {}", args.data.display());

  let model = DetectorBuilder::from_base_model(&BaseModel::new(&args.model))
    // ONNX Runtime 只做推理，训练和验证（包括 .onnx 权重）都交给检测库
    .backend(Backend::Ultralytics)
    .yolo_program(args.yolo)
    .build()?;

  let outcome = TrainTask::new(args.data).run_task(&model)?;

  println!();
  println!("✅ Training completed.");
  if let Some(save_dir) = &outcome.save_dir {
    println!(
      "Results saved in: {}",
      std::path::absolute(save_dir)
        .with_context(|| format!("无法解析结果目录: {}", save_dir.display()))?
        .display()
    );
  }
  if let Some(best) = &outcome.best_weights {
    println!("Best weights: {}", best.display());
  }
  if let Some(all) = &outcome.final_metrics {
    println!(
      "Final mAP50: {:.5}  mAP50-95: {:.5}",
      all.metrics.map50, all.metrics.map50_95
    );
  }

  Ok(())
}
