// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/bin/predict.rs - 坑洼检测推理
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
use clap::{ArgAction, Parser};
use tracing::info;

use pothole::{
  Checkpoint, DetectorBuilder, PredictOptions, Source,
  model::{Backend, DEFAULT_YOLO_PROGRAM},
  task::{PredictTask, Task},
};

/// 对图片、目录、视频或摄像头运行坑洼检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练好的权重文件（.pt 使用检测库，.onnx 使用 ONNX Runtime）
  #[arg(long, default_value = "runs/detect/train3/weights/best.pt", value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入来源：图片/视频文件、目录或摄像头编号（如 0）
  #[arg(long, default_value = "Pothole_Dataset/test/images", value_name = "SOURCE")]
  pub source: Source,
  /// 置信度阈值 (0.0 - 1.0)，越低检测越多
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub conf: f32,
  /// 保存带检测框的图片/视频
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub save: bool,
  /// 实时显示检测结果
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub show: bool,
  /// 保存检测结果文本
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub save_txt: bool,
  /// 文本中保存置信度
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub save_conf: bool,
  /// 推理后端: auto、ultralytics、onnx
  #[arg(long, default_value = "auto", value_name = "BACKEND")]
  pub backend: Backend,
  /// 标注文字字体（仅 ONNX 后端）
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  /// 检测库命令行程序
  #[arg(long, default_value = DEFAULT_YOLO_PROGRAM, value_name = "PROGRAM")]
  pub yolo: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.source);
  info!("置信度阈值: {}", args.conf);

  let checkpoint = Checkpoint::open(&args.model)?;
  let model = DetectorBuilder::from_checkpoint(&checkpoint)
    .backend(args.backend)
    .yolo_program(args.yolo)
    .font(args.font)
    .build()?;

  let options = PredictOptions {
    confidence_threshold: args.conf,
    save_images: args.save,
    show_live: args.show,
    save_labels: args.save_txt,
    save_confidence: args.save_conf,
  };
  let outcome = PredictTask::new(args.source, options).run_task(&model)?;

  println!();
  println!("✅ Detection completed.");
  match &outcome.save_dir {
    Some(save_dir) => println!(
      "Results saved in: {}",
      std::path::absolute(save_dir)
        .with_context(|| format!("无法解析结果目录: {}", save_dir.display()))?
        .display()
    ),
    None => println!("No results were saved."),
  }
  println!("Detections: {}", outcome.total_detections());

  Ok(())
}
