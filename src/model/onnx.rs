// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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
use std::sync::Mutex;

use image::{RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView3, Ix3};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(feature = "save_image_file")]
use crate::output::draw::Draw;
use crate::{
  metrics::ValReport,
  model::{
    DetectItem, DetectResult, Detector, ModelError, PotholeLabel, TrainSpec, WithLabel,
    non_max_suppression,
  },
  output::{
    DirectoryRecordOutput, DirectoryRecordOutputError, ImageDetections, PredictOptions,
    PredictOutcome, Render, TrainOutcome,
  },
  source::{MediaKind, Source},
};

const INPUT_WIDTH: u32 = 640;
const INPUT_HEIGHT: u32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const INTRA_THREADS: usize = 4;
/// 检测库的默认结果目录
pub const DEFAULT_PROJECT_DIR: &str = "runs/detect";
const PREDICT_RUN_NAME: &str = "predict";

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("ONNX Runtime 错误: {0}")]
  RuntimeError(#[from] anyhow::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("输出错误: {0}")]
  OutputError(#[from] DirectoryRecordOutputError),
  #[error("模型错误: {0}")]
  ModelError(#[from] ModelError),
  #[error("不支持的输入来源: {0}")]
  UnsupportedSource(String),
  #[error("模型输出形状无效: {0:?}")]
  UnexpectedShape(Vec<usize>),
  #[error("推理会话已损坏")]
  SessionPoisoned,
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  font: Option<PathBuf>,
}

impl OnnxModelBuilder {
  pub fn font(mut self, font: Option<PathBuf>) -> Self {
    self.font = font;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxError> {
    if !self.model_path.is_file() {
      return Err(ModelError::CheckpointNotFound(self.model_path).into());
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = load_session(&self.model_path)?;
    info!("模型加载完成");

    Ok(OnnxModel {
      session: Mutex::new(session),
      font: self.font,
    })
  }
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
  let _ = ort::init().commit();

  let session = Session::builder()?
    .with_optimization_level(GraphOptimizationLevel::Level3)?
    .with_intra_threads(INTRA_THREADS)?
    .commit_from_file(path)?;
  Ok(session)
}

/// 单输出 YOLO 检测模型（输出 `[1, 4 + 类别数, 候选数]`），只支持推理
pub struct OnnxModel {
  session: Mutex<Session>,
  font: Option<PathBuf>,
}

impl OnnxModel {
  pub fn builder(model_path: impl AsRef<Path>) -> OnnxModelBuilder {
    OnnxModelBuilder {
      model_path: model_path.as_ref().to_path_buf(),
      font: None,
    }
  }

  /// 对一帧图像推理，返回 NMS 之后的检测结果
  pub fn infer(&self, image: &RgbImage, confidence: f32) -> Result<DetectResult, OnnxError> {
    let input = preprocess(image);

    let mut session = self.session.lock().map_err(|_| OnnxError::SessionPoisoned)?;
    let output = run_session(&mut session, &input)?;
    drop(session);

    let shape = output.shape().to_vec();
    let output = output
      .into_dimensionality::<Ix3>()
      .map_err(|_| OnnxError::UnexpectedShape(shape.clone()))?;
    if output.shape()[0] != 1 || output.shape()[1] < 5 {
      return Err(OnnxError::UnexpectedShape(shape));
    }

    let items = decode(
      output.view(),
      INPUT_WIDTH as f32,
      INPUT_HEIGHT as f32,
      confidence,
    );
    debug!("NMS 之前候选框数量: {}", items.len());
    Ok(non_max_suppression(items, NMS_IOU_THRESHOLD).into())
  }

  fn output(&self, options: &PredictOptions) -> Result<Option<DirectoryRecordOutput>, OnnxError> {
    if !options.save_images && !options.save_labels {
      return Ok(None);
    }
    let output =
      DirectoryRecordOutput::create(Path::new(DEFAULT_PROJECT_DIR), PREDICT_RUN_NAME, options)?;
    #[cfg(feature = "save_image_file")]
    let output = match &self.font {
      Some(font) => output.with_draw(Draw::with_font_file(font)),
      None => output,
    };
    #[cfg(not(feature = "save_image_file"))]
    if let Some(font) = &self.font {
      warn!("未启用 save_image_file 特性，忽略字体: {}", font.display());
    }
    Ok(Some(output))
  }
}

fn run_session(session: &mut Session, input: &Array4<f32>) -> anyhow::Result<ndarray::ArrayD<f32>> {
  let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view().into_dyn())?])?;
  let output = outputs[0].try_extract_array::<f32>()?;
  Ok(output.into_owned())
}

/// 选出要推理的图片：摄像头、视频流与单个视频文件不支持，目录中的视频跳过
fn frames(source: &Source) -> Result<Vec<PathBuf>, OnnxError> {
  let files = source
    .media_files()?
    .ok_or_else(|| OnnxError::UnsupportedSource(source.to_string()))?;

  let mut images = Vec::with_capacity(files.len());
  for path in files {
    if MediaKind::of(&path) == Some(MediaKind::Video) {
      if matches!(source, Source::File(_)) {
        return Err(OnnxError::UnsupportedSource(path.display().to_string()));
      }
      warn!("ONNX 后端不解码视频，跳过: {}", path.display());
      continue;
    }
    images.push(path);
  }
  Ok(images)
}

/// 拉伸缩放到模型输入尺寸，转为 NCHW 并归一化到 [0, 1]
fn preprocess(image: &RgbImage) -> Array4<f32> {
  let resized = image::imageops::resize(image, INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle);
  let mut input = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize));
  for (x, y, pixel) in resized.enumerate_pixels() {
    for c in 0..3 {
      input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
    }
  }
  input
}

/// 解码 `[1, 4 + nc, N]` 输出：中心格式边框（模型输入像素坐标）加每类得分。
/// 返回归一化并裁剪到 [0, 1] 的边框，只保留得分高于阈值的候选。
pub fn decode(
  output: ArrayView3<f32>,
  input_width: f32,
  input_height: f32,
  confidence: f32,
) -> Vec<DetectItem> {
  let rows = output.shape()[1];
  let candidates = output.shape()[2];
  let num_classes = rows.saturating_sub(4);

  let mut items = Vec::new();
  for i in 0..candidates {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, output[[0, 4 + c, i]]))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if score <= confidence {
      continue;
    }

    let cx = output[[0, 0, i]] / input_width;
    let cy = output[[0, 1, i]] / input_height;
    let w = output[[0, 2, i]] / input_width;
    let h = output[[0, 3, i]] / input_height;

    items.push(DetectItem {
      kind: PotholeLabel::from_label_id(class_id as u32),
      score,
      bbox: [
        (cx - w / 2.0).clamp(0.0, 1.0),
        (cy - h / 2.0).clamp(0.0, 1.0),
        (cx + w / 2.0).clamp(0.0, 1.0),
        (cy + h / 2.0).clamp(0.0, 1.0),
      ],
    });
  }
  items
}

impl Detector for OnnxModel {
  type Error = OnnxError;

  fn backend_name(&self) -> &'static str {
    "onnx"
  }

  fn train(&self, _spec: &TrainSpec) -> Result<TrainOutcome, Self::Error> {
    Err(ModelError::Unsupported {
      backend: self.backend_name(),
      operation: "train",
    }
    .into())
  }

  fn predict(
    &self,
    source: &Source,
    options: &PredictOptions,
  ) -> Result<PredictOutcome, Self::Error> {
    let files = frames(source)?;

    if options.show_live {
      warn!("ONNX 后端不支持实时显示，忽略 show 选项");
    }

    let output = self.output(options)?;
    let mut images = Vec::with_capacity(files.len());

    for path in files {
      let image = image::open(&path)?.to_rgb8();
      let now = std::time::Instant::now();
      let result = self.infer(&image, options.confidence_threshold)?;
      info!(
        "{}: 检测到 {} 个目标，耗时: {:.2?}",
        path.display(),
        result.len(),
        now.elapsed()
      );
      for item in result.items.iter() {
        debug!(
          "  - {}: {:.2}% at {:?}",
          item.kind.to_label_str(),
          item.score * 100.0,
          item.bbox
        );
      }

      let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
      if let Some(output) = &output {
        output.render_result(&file_name, &image, &result)?;
      }

      let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or(file_name);
      images.push(ImageDetections { name, result });
    }

    Ok(PredictOutcome {
      save_dir: output.map(|output| output.directory().to_path_buf()),
      images,
    })
  }

  fn validate(&self) -> Result<ValReport, Self::Error> {
    Err(ModelError::Unsupported {
      backend: self.backend_name(),
      operation: "val",
    }
    .into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array3;

  // 5 行（cx, cy, w, h, score）× 3 个候选，单类别
  fn single_class_output() -> Array3<f32> {
    let mut out = Array3::<f32>::zeros((1, 5, 3));
    let candidates = [
      [320.0, 320.0, 128.0, 64.0, 0.91],
      [100.0, 100.0, 20.0, 20.0, 0.10],
      [630.0, 10.0, 40.0, 40.0, 0.70],
    ];
    for (i, c) in candidates.iter().enumerate() {
      for (row, v) in c.iter().enumerate() {
        out[[0, row, i]] = *v;
      }
    }
    out
  }

  #[test]
  fn decode_filters_by_confidence() {
    let out = single_class_output();
    let items = decode(out.view(), 640.0, 640.0, 0.25);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, PotholeLabel::Pothole);
    assert!((items[0].bbox[0] - 0.4).abs() < 1e-6);
    assert!((items[0].bbox[1] - 0.45).abs() < 1e-6);
    assert!((items[0].bbox[2] - 0.6).abs() < 1e-6);
  }

  #[test]
  fn decode_clamps_to_unit_square() {
    let out = single_class_output();
    let items = decode(out.view(), 640.0, 640.0, 0.5);
    let edge = &items[1];
    assert_eq!(edge.bbox[1], 0.0);
    assert_eq!(edge.bbox[2], 1.0);
  }

  #[test]
  fn decode_picks_best_class() {
    let mut out = Array3::<f32>::zeros((1, 6, 1));
    out[[0, 0, 0]] = 320.0;
    out[[0, 1, 0]] = 320.0;
    out[[0, 2, 0]] = 64.0;
    out[[0, 3, 0]] = 64.0;
    out[[0, 4, 0]] = 0.3;
    out[[0, 5, 0]] = 0.8;
    let items = decode(out.view(), 640.0, 640.0, 0.25);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, PotholeLabel::Other(1));
    assert_eq!(items[0].score, 0.8);
  }

  #[test]
  fn preprocess_is_nchw_unit_range() {
    let image = RgbImage::from_pixel(32, 16, image::Rgb([255, 0, 51]));
    let input = preprocess(&image);
    assert_eq!(input.shape(), &[1, 3, 640, 640]);
    assert!((input[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
    assert_eq!(input[[0, 1, 10, 10]], 0.0);
    assert!((input[[0, 2, 10, 10]] - 0.2).abs() < 1e-6);
  }

  #[test]
  fn live_sources_are_rejected() {
    for source in [
      Source::Device(0),
      Source::Stream("rtsp://camera.local/stream1".to_string()),
    ] {
      assert!(matches!(frames(&source), Err(OnnxError::UnsupportedSource(_))));
    }
  }

  #[test]
  fn single_video_file_is_rejected() {
    let source = Source::File(PathBuf::from("Pothole_Dataset/test/road.mp4"));
    assert!(matches!(frames(&source), Err(OnnxError::UnsupportedSource(_))));

    let source = Source::File(PathBuf::from("Pothole_Dataset/test/road.jpg"));
    assert_eq!(frames(&source).unwrap(), [PathBuf::from("Pothole_Dataset/test/road.jpg")]);
  }

  #[test]
  fn videos_in_directory_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.jpg", "a.png", "clip.mp4", "notes.txt"] {
      std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let source = Source::Directory(dir.path().to_path_buf());
    assert_eq!(
      frames(&source).unwrap(),
      [dir.path().join("a.png"), dir.path().join("b.jpg")]
    );
  }

  #[test]
  fn missing_model_fails_before_loading() {
    let err = OnnxModel::builder("no/such/best.onnx").build().err().unwrap();
    assert!(matches!(
      err,
      OnnxError::ModelError(ModelError::CheckpointNotFound(_))
    ));
  }
}
