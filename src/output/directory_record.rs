// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/output/directory_record.rs - 结果目录记录输出
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

use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "save_image_file")]
use crate::output::draw::Draw;
use crate::{
  model::{DetectResult, WithLabel},
  output::{
    PredictOptions, Render,
    labels::{self, LABELS_DIR, LabelError},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
}

/// 按检测库的约定选择运行目录：`<parent>/<name>`、`<parent>/<name>2`、`<parent>/<name>3` ... 中第一个不存在的
pub fn next_run_dir(parent: &Path, name: &str) -> PathBuf {
  let first = parent.join(name);
  if !first.exists() {
    return first;
  }
  (2u32..)
    .map(|n| parent.join(format!("{}{}", name, n)))
    .find(|candidate| !candidate.exists())
    .unwrap_or(first)
}

/// 把每帧的标注图片与标签文本写入一个运行目录
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  save_images: bool,
  save_labels: bool,
  save_confidence: bool,
  #[cfg(feature = "save_image_file")]
  draw: Draw,
}

impl DirectoryRecordOutput {
  /// 在 `parent` 下创建新的编号运行目录
  pub fn create(
    parent: &Path,
    name: &str,
    options: &PredictOptions,
  ) -> Result<Self, DirectoryRecordOutputError> {
    let directory = next_run_dir(parent, name);
    std::fs::create_dir_all(&directory)?;
    info!("结果目录: {}", directory.display());

    Ok(Self {
      directory,
      save_images: options.save_images,
      save_labels: options.save_labels,
      save_confidence: options.save_confidence,
      #[cfg(feature = "save_image_file")]
      draw: Draw::default(),
    })
  }

  #[cfg(feature = "save_image_file")]
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 写入一帧的标签文本；没有检测结果时不创建文件
  fn record<T: WithLabel>(
    &self,
    name: &str,
    result: &DetectResult<T>,
  ) -> Result<(), DirectoryRecordOutputError> {
    if !self.save_labels || result.is_empty() {
      return Ok(());
    }
    let stem = Path::new(name)
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| name.to_string());
    let path = self.directory.join(LABELS_DIR).join(format!("{}.txt", stem));
    labels::write_file(&path, result, self.save_confidence)?;
    debug!("写入标签文件: {}", path.display());
    Ok(())
  }
}

impl<T: WithLabel> Render<image::RgbImage, DetectResult<T>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    name: &str,
    frame: &image::RgbImage,
    result: &DetectResult<T>,
  ) -> Result<(), Self::Error> {
    if self.save_images {
      let path = self.directory.join(name);
      #[cfg(feature = "save_image_file")]
      {
        let mut image = frame.clone();
        self.draw.draw_detections(&mut image, result);
        image.save(&path)?;
      }
      #[cfg(not(feature = "save_image_file"))]
      {
        tracing::warn!("未启用 save_image_file 特性，保存未标注的原图");
        frame.save(&path)?;
      }
      debug!("保存图像到文件: {}", path.display());
    }
    self.record(name, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn run_dirs_are_numbered_like_the_library() {
    let parent = tempfile::tempdir().unwrap();
    let first = next_run_dir(parent.path(), "predict");
    assert_eq!(first, parent.path().join("predict"));

    std::fs::create_dir_all(&first).unwrap();
    assert_eq!(next_run_dir(parent.path(), "predict"), parent.path().join("predict2"));

    std::fs::create_dir_all(parent.path().join("predict2")).unwrap();
    assert_eq!(next_run_dir(parent.path(), "predict"), parent.path().join("predict3"));
  }

  #[test]
  fn renders_image_and_labels() {
    use crate::model::{DetectItem, PotholeLabel};

    let parent = tempfile::tempdir().unwrap();
    let output =
      DirectoryRecordOutput::create(parent.path(), "predict", &PredictOptions::default()).unwrap();
    let frame = image::RgbImage::new(64, 48);
    let result: DetectResult = vec![DetectItem {
      kind: PotholeLabel::Pothole,
      score: 0.66,
      bbox: [0.25, 0.25, 0.75, 0.75],
    }]
    .into();

    output.render_result("road.png", &frame, &result).unwrap();
    output
      .render_result("clean.png", &frame, &DetectResult::<PotholeLabel>::default())
      .unwrap();

    assert!(output.directory().join("road.png").is_file());
    assert!(output.directory().join("clean.png").is_file());
    let labels = labels::read_dir(output.directory()).unwrap();
    assert_eq!(labels.len(), 1);
    assert!((labels[0].result.items[0].score - 0.66).abs() < 1e-5);
  }
}
