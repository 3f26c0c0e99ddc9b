// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/output.rs - 输出定义
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

use serde::Serialize;

use crate::{metrics::ClassMetrics, model::DetectResult};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, name: &str, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod labels;

#[cfg(feature = "image")]
mod directory_record;
#[cfg(feature = "image")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, next_run_dir};

#[cfg(feature = "save_image_file")]
pub mod draw;

/// 推理选项，原样转交检测库
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictOptions {
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// 保存带检测框的图片/视频
  pub save_images: bool,
  /// 实时显示
  pub show_live: bool,
  /// 保存每张图片的标签文本
  pub save_labels: bool,
  /// 标签文本中附带置信度
  pub save_confidence: bool,
}

impl Default for PredictOptions {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.25,
      save_images: true,
      show_live: true,
      save_labels: true,
      save_confidence: true,
    }
  }
}

/// 单张图片（或视频帧）的检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDetections {
  pub name: String,
  pub result: DetectResult,
}

/// 一次推理的结果集
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictOutcome {
  /// 检测库选定的结果目录，没有产生任何输出时为空
  pub save_dir: Option<PathBuf>,
  pub images: Vec<ImageDetections>,
}

impl PredictOutcome {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.images.iter().all(|image| image.result.is_empty())
  }

  /// 有检测结果的图片数；检测库只为有目标的图片写标签，无目标的图片不在结果集中
  pub fn images_with_detections(&self) -> usize {
    self
      .images
      .iter()
      .filter(|image| !image.result.is_empty())
      .count()
  }

  pub fn total_detections(&self) -> usize {
    self.images.iter().map(|image| image.result.len()).sum()
  }

  pub fn max_score(&self) -> Option<f32> {
    self
      .images
      .iter()
      .filter_map(|image| image.result.max_score())
      .reduce(f32::max)
  }
}

/// 一次训练的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainOutcome {
  pub save_dir: Option<PathBuf>,
  pub best_weights: Option<PathBuf>,
  pub last_weights: Option<PathBuf>,
  /// 训练结束时检测库打印的最终验证结果
  pub final_metrics: Option<ClassMetrics>,
}

impl TrainOutcome {
  /// 在结果目录下查找 `weights/best.pt` 与 `weights/last.pt`
  pub fn from_save_dir(save_dir: Option<PathBuf>, final_metrics: Option<ClassMetrics>) -> Self {
    let find = |name: &str| {
      save_dir
        .as_deref()
        .map(|dir| dir.join("weights").join(name))
        .filter(|path| path.is_file())
    };
    Self {
      best_weights: find("best.pt"),
      last_weights: find("last.pt"),
      save_dir,
      final_metrics,
    }
  }
}

/// 结果目录是否存在且非空
pub fn is_non_empty_dir(dir: &Path) -> bool {
  std::fs::read_dir(dir)
    .map(|mut entries| entries.next().is_some())
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, PotholeLabel};

  #[test]
  fn default_options_match_detection_script() {
    let options = PredictOptions::default();
    assert_eq!(options.confidence_threshold, 0.25);
    assert!(options.save_images && options.show_live);
    assert!(options.save_labels && options.save_confidence);
  }

  #[test]
  fn outcome_aggregates_over_images() {
    let hit = |score| DetectItem {
      kind: PotholeLabel::Pothole,
      score,
      bbox: [0.1, 0.1, 0.2, 0.2],
    };
    let outcome = PredictOutcome {
      save_dir: None,
      images: vec![
        ImageDetections {
          name: "a".into(),
          result: vec![hit(0.3), hit(0.8)].into(),
        },
        ImageDetections {
          name: "b".into(),
          result: DetectResult::default(),
        },
      ],
    };
    assert_eq!(outcome.total_detections(), 2);
    assert_eq!(outcome.images_with_detections(), 1);
    assert_eq!(outcome.max_score(), Some(0.8));
    assert!(!outcome.is_empty());
    assert!(PredictOutcome::empty().is_empty());
  }

  #[test]
  fn train_outcome_probes_weights() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("weights")).unwrap();
    std::fs::write(dir.path().join("weights/best.pt"), b"w").unwrap();

    let outcome = TrainOutcome::from_save_dir(Some(dir.path().to_path_buf()), None);
    assert_eq!(outcome.best_weights, Some(dir.path().join("weights/best.pt")));
    assert_eq!(outcome.last_weights, None);
    assert!(is_non_empty_dir(dir.path()));
  }
}
