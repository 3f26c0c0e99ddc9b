// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/task.rs - 训练、推理、验证任务
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
use std::time::Instant;

use tracing::{info, warn};

use crate::{
  metrics::ValReport,
  model::{Detector, TrainSpec},
  output::{PredictOptions, PredictOutcome, TrainOutcome},
  source::Source,
};

pub const TRAIN_EPOCHS: u32 = 50;
pub const TRAIN_IMAGE_SIZE: u32 = 640;
pub const TRAIN_BATCH: u32 = 8;

/// 每个任务都是一次阻塞调用，失败直接返回，不重试
pub trait Task<M: Detector>: Sized {
  type Output;
  type Error;
  fn run_task(self, model: &M) -> Result<Self::Output, Self::Error>;
}

/// 训练任务，超参数固定
pub struct TrainTask {
  data: PathBuf,
}

impl TrainTask {
  pub fn new(data: impl Into<PathBuf>) -> Self {
    Self { data: data.into() }
  }

  pub fn spec(&self) -> TrainSpec {
    TrainSpec {
      data: self.data.clone(),
      epochs: TRAIN_EPOCHS,
      image_size: TRAIN_IMAGE_SIZE,
      batch: TRAIN_BATCH,
    }
  }
}

impl<M: Detector> Task<M> for TrainTask {
  type Output = TrainOutcome;
  type Error = anyhow::Error;

  fn run_task(self, model: &M) -> Result<Self::Output, Self::Error> {
    let spec = self.spec();
    info!(
      "开始训练 ({}): 数据集 {}，{} 轮，图像尺寸 {}，批大小 {}",
      model.backend_name(),
      spec.data.display(),
      spec.epochs,
      spec.image_size,
      spec.batch
    );
    let now = Instant::now();
    let outcome = model.train(&spec)?;
    info!("训练完成，耗时: {:.2?}", now.elapsed());
    Ok(outcome)
  }
}

/// 推理任务
pub struct PredictTask {
  source: Source,
  options: PredictOptions,
}

impl PredictTask {
  pub fn new(source: Source, options: PredictOptions) -> Self {
    Self { source, options }
  }
}

impl<M: Detector> Task<M> for PredictTask {
  type Output = PredictOutcome;
  type Error = anyhow::Error;

  fn run_task(self, model: &M) -> Result<Self::Output, Self::Error> {
    info!("输入来源: {}", self.source);
    if self.source.is_empty_directory()? {
      warn!("输入目录中没有图片或视频，跳过推理: {}", self.source);
      return Ok(PredictOutcome::empty());
    }

    info!("开始推理 ({})...", model.backend_name());
    let now = Instant::now();
    let outcome = model.predict(&self.source, &self.options)?;
    info!(
      "推理完成，耗时: {:.2?}，有检测结果的图片 {} 张，共 {} 个目标",
      now.elapsed(),
      outcome.images_with_detections(),
      outcome.total_detections()
    );
    Ok(outcome)
  }
}

/// 验证任务，数据集由模型自身的配置决定
pub struct EvaluateTask;

impl<M: Detector> Task<M> for EvaluateTask {
  type Output = ValReport;
  type Error = anyhow::Error;

  fn run_task(self, model: &M) -> Result<Self::Output, Self::Error> {
    info!("开始验证 ({})...", model.backend_name());
    let now = Instant::now();
    let report = model.validate()?;
    info!("验证完成，耗时: {:.2?}", now.elapsed());
    if !report.all.metrics.is_well_formed() {
      warn!("验证指标超出预期范围: {:?}", report.all.metrics);
    }
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::metrics::{BoxMetrics, ClassMetrics};

  #[derive(Debug, thiserror::Error)]
  #[error("stub")]
  struct StubError;

  #[derive(Default)]
  struct StubDetector {
    predict_calls: Cell<usize>,
  }

  impl Detector for StubDetector {
    type Error = StubError;

    fn backend_name(&self) -> &'static str {
      "stub"
    }

    fn train(&self, spec: &TrainSpec) -> Result<TrainOutcome, Self::Error> {
      assert_eq!((spec.epochs, spec.image_size, spec.batch), (50, 640, 8));
      Ok(TrainOutcome::default())
    }

    fn predict(&self, _: &Source, _: &PredictOptions) -> Result<PredictOutcome, Self::Error> {
      self.predict_calls.set(self.predict_calls.get() + 1);
      Ok(PredictOutcome::empty())
    }

    fn validate(&self) -> Result<ValReport, Self::Error> {
      let all = ClassMetrics {
        name: "all".into(),
        images: 1,
        instances: 1,
        metrics: BoxMetrics {
          precision: 1.0,
          recall: 1.0,
          map50: 0.9,
          map50_95: 0.6,
        },
      };
      Ok(ValReport::new(all, Vec::new(), None))
    }
  }

  #[test]
  fn train_uses_fixed_hyperparameters() {
    let detector = StubDetector::default();
    TrainTask::new("data.yaml").run_task(&detector).unwrap();
  }

  #[test]
  fn empty_directory_skips_the_detector() {
    let dir = tempfile::tempdir().unwrap();
    let detector = StubDetector::default();
    let outcome = PredictTask::new(
      Source::Directory(dir.path().to_path_buf()),
      PredictOptions::default(),
    )
    .run_task(&detector)
    .unwrap();
    assert!(outcome.is_empty());
    assert_eq!(outcome.save_dir, None);
    assert_eq!(detector.predict_calls.get(), 0);
  }

  #[test]
  fn device_source_reaches_the_detector() {
    let detector = StubDetector::default();
    PredictTask::new(Source::Device(0), PredictOptions::default())
      .run_task(&detector)
      .unwrap();
    assert_eq!(detector.predict_calls.get(), 1);
  }

  #[test]
  fn evaluate_returns_report() {
    let report = EvaluateTask.run_task(&StubDetector::default()).unwrap();
    assert_eq!(report.map50(), 0.9);
  }
}
