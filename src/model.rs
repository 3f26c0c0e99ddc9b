// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/model.rs - 检测模型与后端
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

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  metrics::ValReport,
  output::{PredictOptions, PredictOutcome, TrainOutcome},
  source::Source,
};

mod ultralytics;
pub use self::ultralytics::{UltralyticsError, UltralyticsModel};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxError, OnnxModel};

/// 外部检测能力：训练、推理、验证各一次阻塞调用
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn backend_name(&self) -> &'static str;
  fn train(&self, spec: &TrainSpec) -> Result<TrainOutcome, Self::Error>;
  fn predict(
    &self,
    source: &Source,
    options: &PredictOptions,
  ) -> Result<PredictOutcome, Self::Error>;
  fn validate(&self) -> Result<ValReport, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 坑洼数据集只有一个类别，其余编号原样保留
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PotholeLabel {
  Pothole,
  Other(u32),
}

impl WithLabel for PotholeLabel {
  fn to_label_str(&self) -> String {
    match self {
      PotholeLabel::Pothole => "pothole".to_string(),
      PotholeLabel::Other(id) => format!("class{}", id),
    }
  }

  fn to_label_id(&self) -> u32 {
    match self {
      PotholeLabel::Pothole => 0,
      PotholeLabel::Other(id) => *id,
    }
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => PotholeLabel::Pothole,
      id => PotholeLabel::Other(id),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem<T = PotholeLabel> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResult<T = PotholeLabel> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> Default for DetectResult<T> {
  fn default() -> Self {
    Self {
      items: Box::new([]),
    }
  }
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn max_score(&self) -> Option<f32> {
    self.items.iter().map(|item| item.score).reduce(f32::max)
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 两个归一化边框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// 按类别做贪心非极大值抑制，结果按置信度降序
pub fn non_max_suppression<T: WithLabel>(
  mut items: Vec<DetectItem<T>>,
  iou_threshold: f32,
) -> Vec<DetectItem<T>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem<T>> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept.iter().any(|best| {
      best.kind.to_label_id() == item.kind.to_label_id() && iou(&best.bbox, &item.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {}", .0.display())]
  CheckpointNotFound(PathBuf),
  #[error("{backend} 后端不支持操作: {operation}")]
  Unsupported {
    backend: &'static str,
    operation: &'static str,
  },
  #[error("后端 {0} 未编译进本程序")]
  BackendDisabled(&'static str),
  #[error("未知后端: {0}")]
  UnknownBackend(String),
}

/// 已训练的权重文件，打开时即检查是否存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
  path: PathBuf,
}

impl Checkpoint {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(ModelError::CheckpointNotFound(path.to_path_buf()));
    }
    debug!("找到模型文件: {}", path.display());
    Ok(Self {
      path: path.to_path_buf(),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 训练用的基础模型，名称由检测库自行解析（如 `yolov8n.pt` 会被自动下载），不做存在性检查
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseModel {
  path: PathBuf,
}

impl BaseModel {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 一次训练的完整参数
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSpec {
  pub data: PathBuf,
  pub epochs: u32,
  pub image_size: u32,
  pub batch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
  /// 按权重文件扩展名选择
  #[default]
  Auto,
  Ultralytics,
  Onnx,
}

impl FromStr for Backend {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(Backend::Auto),
      "ultralytics" | "yolo" => Ok(Backend::Ultralytics),
      "onnx" | "ort" => Ok(Backend::Onnx),
      other => Err(ModelError::UnknownBackend(other.to_string())),
    }
  }
}

impl Backend {
  pub fn resolve(self, weights: &Path) -> Backend {
    match self {
      Backend::Auto => {
        let is_onnx = weights
          .extension()
          .and_then(|ext| ext.to_str())
          .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if is_onnx {
          Backend::Onnx
        } else {
          Backend::Ultralytics
        }
      }
      other => other,
    }
  }
}

pub const DEFAULT_YOLO_PROGRAM: &str = "yolo";

pub struct DetectorBuilder {
  weights: PathBuf,
  backend: Backend,
  yolo_program: String,
  font: Option<PathBuf>,
}

impl DetectorBuilder {
  pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
    Self::with_weights(checkpoint.path())
  }

  pub fn from_base_model(base: &BaseModel) -> Self {
    Self::with_weights(base.path())
  }

  fn with_weights(weights: &Path) -> Self {
    Self {
      weights: weights.to_path_buf(),
      backend: Backend::Auto,
      yolo_program: DEFAULT_YOLO_PROGRAM.to_string(),
      font: None,
    }
  }

  pub fn backend(mut self, backend: Backend) -> Self {
    self.backend = backend;
    self
  }

  pub fn yolo_program(mut self, program: impl Into<String>) -> Self {
    self.yolo_program = program.into();
    self
  }

  /// 标注文字所用字体，仅 ONNX 后端使用
  pub fn font(mut self, font: Option<PathBuf>) -> Self {
    self.font = font;
    self
  }

  pub fn build(self) -> Result<DetectorWrapper, DetectorError> {
    match self.backend.resolve(&self.weights) {
      Backend::Onnx => {
        #[cfg(feature = "onnx")]
        {
          info!("使用 ONNX Runtime 后端: {}", self.weights.display());
          let model = OnnxModel::builder(&self.weights).font(self.font).build()?;
          Ok(DetectorWrapper::Onnx(Box::new(model)))
        }
        #[cfg(not(feature = "onnx"))]
        {
          Err(ModelError::BackendDisabled("onnx").into())
        }
      }
      _ => {
        info!(
          "使用 Ultralytics 后端 ({}): {}",
          self.yolo_program,
          self.weights.display()
        );
        Ok(DetectorWrapper::Ultralytics(UltralyticsModel::new(
          self.yolo_program,
          self.weights,
        )))
      }
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型错误: {0}")]
  ModelError(#[from] ModelError),
  #[error("Ultralytics 后端错误: {0}")]
  UltralyticsError(#[from] UltralyticsError),
  #[cfg(feature = "onnx")]
  #[error("ONNX 后端错误: {0}")]
  OnnxError(#[from] OnnxError),
}

pub enum DetectorWrapper {
  Ultralytics(UltralyticsModel),
  #[cfg(feature = "onnx")]
  Onnx(Box<OnnxModel>),
}

impl Detector for DetectorWrapper {
  type Error = DetectorError;

  fn backend_name(&self) -> &'static str {
    match self {
      DetectorWrapper::Ultralytics(model) => model.backend_name(),
      #[cfg(feature = "onnx")]
      DetectorWrapper::Onnx(model) => model.backend_name(),
    }
  }

  fn train(&self, spec: &TrainSpec) -> Result<TrainOutcome, Self::Error> {
    match self {
      DetectorWrapper::Ultralytics(model) => model.train(spec).map_err(DetectorError::from),
      #[cfg(feature = "onnx")]
      DetectorWrapper::Onnx(model) => model.train(spec).map_err(DetectorError::from),
    }
  }

  fn predict(
    &self,
    source: &Source,
    options: &PredictOptions,
  ) -> Result<PredictOutcome, Self::Error> {
    match self {
      DetectorWrapper::Ultralytics(model) => model
        .predict(source, options)
        .map_err(DetectorError::from),
      #[cfg(feature = "onnx")]
      DetectorWrapper::Onnx(model) => model
        .predict(source, options)
        .map_err(DetectorError::from),
    }
  }

  fn validate(&self) -> Result<ValReport, Self::Error> {
    match self {
      DetectorWrapper::Ultralytics(model) => model.validate().map_err(DetectorError::from),
      #[cfg(feature = "onnx")]
      DetectorWrapper::Onnx(model) => model.validate().map_err(DetectorError::from),
    }
  }
}
