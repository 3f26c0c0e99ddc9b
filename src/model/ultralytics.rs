// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/model/ultralytics.rs - Ultralytics 命令行后端
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

//! 以子进程方式调用检测库自带的 `yolo` 命令行：
//! `yolo detect <train|predict|val> key=value ...`。
//! 训练、推理、NMS 与指标计算都在子进程内完成，这里只转发参数并读回结果目录与汇总表。

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  metrics::{ValReport, parse_summary},
  model::{Detector, TrainSpec},
  output::{
    PredictOptions, PredictOutcome, TrainOutcome,
    labels::{self, LabelError},
  },
  source::Source,
};

const TASK: &str = "detect";
const SAVE_DIR_MARKER: &str = "Results saved to ";
/// 检测库在每个训练结果目录中保存的训练参数
const TRAIN_ARGS_FILE: &str = "args.yaml";

static ANSI_ESCAPE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ANSI 转义正则无效"));

// 只取顶层 `data:` 键，值可以带引号
static DATA_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?m)^data:[ \t]*["']?([^"'\r\n]*?)["']?[ \t]*$"#).expect("data 键正则无效")
});

#[derive(Error, Debug)]
pub enum UltralyticsError {
  #[error("找不到检测库命令行程序: {0}")]
  ProgramNotFound(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测库 {operation} 失败，退出码: {code:?}")]
  ProcessFailed {
    operation: &'static str,
    code: Option<i32>,
  },
  #[error("检测库输出中没有验证汇总表")]
  MissingSummary,
  #[error("找不到权重文件对应的训练数据集（缺少 {}）", .0.display())]
  MissingTrainingData(PathBuf),
  #[error("标签读取错误: {0}")]
  LabelError(#[from] LabelError),
}

/// 去掉控制台输出中的 ANSI 颜色码
pub fn strip_ansi(line: &str) -> String {
  ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// 取最后一条 `Results saved to <dir>` 中的目录
pub fn parse_save_dir<S: AsRef<str>>(lines: &[S]) -> Option<PathBuf> {
  lines.iter().rev().find_map(|line| {
    let line = line.as_ref();
    let start = line.find(SAVE_DIR_MARKER)? + SAVE_DIR_MARKER.len();
    let dir = line[start..].trim();
    (!dir.is_empty()).then(|| PathBuf::from(dir))
  })
}

/// 读取权重文件所属训练目录中的 `args.yaml`（`<run>/weights/best.pt` 对应 `<run>/args.yaml`），
/// 返回训练时使用的数据集描述文件
pub fn training_data(weights: &Path) -> Result<PathBuf, UltralyticsError> {
  let args_file = weights
    .parent()
    .and_then(Path::parent)
    .map(|run| run.join(TRAIN_ARGS_FILE))
    .unwrap_or_else(|| PathBuf::from(TRAIN_ARGS_FILE));
  let text = match std::fs::read_to_string(&args_file) {
    Ok(text) => text,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(UltralyticsError::MissingTrainingData(args_file));
    }
    Err(e) => return Err(e.into()),
  };
  DATA_ENTRY
    .captures(&text)
    .and_then(|caps| caps.get(1))
    .map(|data| data.as_str().trim())
    .filter(|data| !data.is_empty())
    .map(PathBuf::from)
    .ok_or(UltralyticsError::MissingTrainingData(args_file))
}

fn arg(key: &str, value: impl AsRef<OsStr>) -> OsString {
  let mut arg = OsString::from(key);
  arg.push("=");
  arg.push(value);
  arg
}

fn flag(value: bool) -> &'static str {
  if value { "True" } else { "False" }
}

pub struct UltralyticsModel {
  program: String,
  weights: PathBuf,
}

impl UltralyticsModel {
  pub fn new(program: impl Into<String>, weights: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      weights: weights.into(),
    }
  }

  pub fn train_args(&self, spec: &TrainSpec) -> Vec<OsString> {
    vec![
      arg("model", &self.weights),
      arg("data", &spec.data),
      arg("epochs", spec.epochs.to_string()),
      arg("imgsz", spec.image_size.to_string()),
      arg("batch", spec.batch.to_string()),
    ]
  }

  pub fn predict_args(&self, source: &Source, options: &PredictOptions) -> Vec<OsString> {
    let source = match source {
      Source::File(path) | Source::Directory(path) => arg("source", path),
      other => arg("source", other.to_string()),
    };
    vec![
      arg("model", &self.weights),
      source,
      arg("conf", options.confidence_threshold.to_string()),
      arg("save", flag(options.save_images)),
      arg("show", flag(options.show_live)),
      arg("save_txt", flag(options.save_labels)),
      arg("save_conf", flag(options.save_confidence)),
    ]
  }

  /// 验证使用权重训练时的数据集；检测库在缺少 `data` 时会换成自带的示例数据集
  pub fn val_args(&self) -> Result<Vec<OsString>, UltralyticsError> {
    let data = training_data(&self.weights)?;
    info!("验证数据集: {}", data.display());
    Ok(vec![arg("model", &self.weights), arg("data", data)])
  }

  fn command(&self, mode: &str, args: &[OsString]) -> Command {
    let mut command = Command::new(&self.program);
    command
      .arg(TASK)
      .arg(mode)
      .args(args)
      .env("PYTHONUNBUFFERED", "1")
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit());
    command
  }

  /// 运行一次 `yolo detect <mode>`，逐行转发并收集标准输出（去除颜色码）。
  /// 标准错误（进度条）直接继承到当前终端。
  fn run(&self, mode: &'static str, args: Vec<OsString>) -> Result<Vec<String>, UltralyticsError> {
    info!("执行: {} {} {} {:?}", self.program, TASK, mode, args);
    let now = Instant::now();

    let mut child = self
      .command(mode, &args)
      .spawn()
      .map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => UltralyticsError::ProgramNotFound(self.program.clone()),
        _ => UltralyticsError::IoError(e),
      })?;

    let mut lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
      for raw in BufReader::new(stdout).split(b'\n') {
        let raw = raw?;
        let line = strip_ansi(String::from_utf8_lossy(&raw).trim_end_matches('\r'));
        info!("[yolo] {}", line);
        lines.push(line);
      }
    }

    let status = child.wait()?;
    info!("{} 结束，耗时: {:.2?}，状态: {}", mode, now.elapsed(), status);
    if !status.success() {
      return Err(UltralyticsError::ProcessFailed {
        operation: mode,
        code: status.code(),
      });
    }
    Ok(lines)
  }
}

impl Detector for UltralyticsModel {
  type Error = UltralyticsError;

  fn backend_name(&self) -> &'static str {
    "ultralytics"
  }

  fn train(&self, spec: &TrainSpec) -> Result<TrainOutcome, Self::Error> {
    let lines = self.run("train", self.train_args(spec))?;
    let save_dir = parse_save_dir(&lines);
    if save_dir.is_none() {
      warn!("检测库输出中没有找到训练结果目录");
    }
    let final_metrics = parse_summary(&lines).map(|(all, _)| all);
    Ok(TrainOutcome::from_save_dir(save_dir, final_metrics))
  }

  fn predict(
    &self,
    source: &Source,
    options: &PredictOptions,
  ) -> Result<PredictOutcome, Self::Error> {
    let lines = self.run("predict", self.predict_args(source, options))?;
    let save_dir = parse_save_dir(&lines);
    let images = match &save_dir {
      Some(dir) => labels::read_dir(dir)?,
      None => {
        debug!("检测库没有报告结果目录");
        Vec::new()
      }
    };
    Ok(PredictOutcome { save_dir, images })
  }

  fn validate(&self) -> Result<ValReport, Self::Error> {
    let lines = self.run("val", self.val_args()?)?;
    let (all, classes) = parse_summary(&lines).ok_or(UltralyticsError::MissingSummary)?;
    Ok(ValReport::new(all, classes, parse_save_dir(&lines)))
  }
}
