// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/metrics.rs - 验证指标报告
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

//! 指标全部由检测库计算，这里只负责读回检测库打印的汇总表。
//!
//! 汇总表每行形如 `<类别名> <图片数> <目标数> <P> <R> <mAP50> <mAP50-95>`，
//! 第一行类别名为 `all`，其后为各类别（仅在多类别时打印）。

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

pub const ALL_CLASSES: &str = "all";
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.png";

/// 一行框检测指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxMetrics {
  pub precision: f64,
  pub recall: f64,
  pub map50: f64,
  pub map50_95: f64,
}

impl BoxMetrics {
  /// 所有值都在 [0, 1] 内，且 mAP50 不小于 mAP50-95
  pub fn is_well_formed(&self) -> bool {
    let unit = |v: f64| (0.0..=1.0).contains(&v);
    unit(self.precision)
      && unit(self.recall)
      && unit(self.map50)
      && unit(self.map50_95)
      && self.map50 >= self.map50_95
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
  pub name: String,
  pub images: u64,
  pub instances: u64,
  pub metrics: BoxMetrics,
}

impl ClassMetrics {
  /// 解析汇总表的一行；不是汇总行时返回 `None`
  pub fn parse_row(line: &str) -> Option<Self> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 7 {
      return None;
    }
    let (name, numbers) = fields.split_at(fields.len() - 6);
    let images = numbers[0].parse().ok()?;
    let instances = numbers[1].parse().ok()?;
    let mut values = [0f64; 4];
    for (slot, field) in values.iter_mut().zip(&numbers[2..]) {
      *slot = field.parse().ok()?;
    }
    let [precision, recall, map50, map50_95] = values;

    Some(Self {
      name: name.join(" "),
      images,
      instances,
      metrics: BoxMetrics {
        precision,
        recall,
        map50,
        map50_95,
      },
    })
  }
}

/// 从控制台输出中取最后一张汇总表：`all` 行及其后连续的各类别行
pub fn parse_summary<S: AsRef<str>>(lines: &[S]) -> Option<(ClassMetrics, Vec<ClassMetrics>)> {
  let start = lines.iter().rposition(|line| {
    ClassMetrics::parse_row(line.as_ref()).is_some_and(|row| row.name == ALL_CLASSES)
  })?;

  let all = ClassMetrics::parse_row(lines[start].as_ref())?;
  let classes: Vec<ClassMetrics> = lines[start + 1..]
    .iter()
    .map_while(|line| ClassMetrics::parse_row(line.as_ref()))
    .collect();
  debug!("解析到汇总表: all + {} 个类别", classes.len());

  Some((all, classes))
}

/// 一次验证的报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValReport {
  pub all: ClassMetrics,
  pub classes: Vec<ClassMetrics>,
  /// 检测库绘制的混淆矩阵图
  pub confusion_matrix: Option<PathBuf>,
  pub save_dir: Option<PathBuf>,
}

impl ValReport {
  pub fn new(all: ClassMetrics, classes: Vec<ClassMetrics>, save_dir: Option<PathBuf>) -> Self {
    let confusion_matrix = save_dir
      .as_ref()
      .map(|dir| dir.join(CONFUSION_MATRIX_FILE))
      .filter(|path| path.is_file());
    Self {
      all,
      classes,
      confusion_matrix,
      save_dir,
    }
  }

  fn per_class(&self, pick: impl Fn(&BoxMetrics) -> f64) -> Vec<f64> {
    if self.classes.is_empty() {
      vec![pick(&self.all.metrics)]
    } else {
      self.classes.iter().map(|class| pick(&class.metrics)).collect()
    }
  }

  /// 各类别精确率（单类别时即总体值）
  pub fn precision(&self) -> Vec<f64> {
    self.per_class(|m| m.precision)
  }

  /// 各类别召回率（单类别时即总体值）
  pub fn recall(&self) -> Vec<f64> {
    self.per_class(|m| m.recall)
  }

  pub fn map50(&self) -> f64 {
    self.all.metrics.map50
  }

  pub fn map50_95(&self) -> f64 {
    self.all.metrics.map50_95
  }
}

struct Values<'a>(&'a [f64]);

impl fmt::Display for Values<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, v) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, " ")?;
      }
      write!(f, "{:.5}", v)?;
    }
    write!(f, "]")
  }
}

impl fmt::Display for ValReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Precision: {}", Values(&self.precision()))?;
    writeln!(f, "Recall: {}", Values(&self.recall()))?;
    writeln!(f, "mAP50: {:.5}", self.map50())?;
    write!(f, "mAP50-95: {:.5}", self.map50_95())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const VAL_OUTPUT: &[&str] = &[
    "Ultralytics 8.3.40 🚀 Python-3.11.9 torch-2.5.1+cu124 CUDA:0",
    "Model summary (fused): 168 layers, 3,005,843 parameters, 0 gradients, 8.1 GFLOPs",
    "                   all         66        170      0.741      0.641      0.711      0.427",
    "Speed: 0.3ms preprocess, 4.0ms inference, 0.0ms loss, 1.4ms postprocess per image",
    "Results saved to runs/detect/val",
  ];

  #[test]
  fn parses_single_class_summary() {
    let (all, classes) = parse_summary(VAL_OUTPUT).unwrap();
    assert_eq!(all.name, "all");
    assert_eq!(all.images, 66);
    assert_eq!(all.instances, 170);
    assert_eq!(all.metrics.map50, 0.711);
    assert!(classes.is_empty());
    assert!(all.metrics.is_well_formed());
  }

  #[test]
  fn parses_class_names_with_spaces() {
    let lines = [
      "                   all        128        929      0.640      0.537      0.605      0.446",
      "                person         61        254      0.797      0.679      0.764      0.502",
      "         traffic light          4         14      0.541      0.214      0.293      0.151",
      "Speed: 0.2ms preprocess",
    ];
    let (_, classes) = parse_summary(&lines[..]).unwrap();
    assert_eq!(classes.len(), 2);
    assert_eq!(classes[1].name, "traffic light");
    assert_eq!(classes[1].instances, 14);
  }

  #[test]
  fn takes_the_last_table() {
    let lines = [
      "                   all         66        170      0.100      0.100      0.050      0.020",
      "      1/50      2.1G      1.712      2.934      1.801         21        640",
      "                   all         66        170      0.741      0.641      0.711      0.427",
    ];
    let (all, _) = parse_summary(&lines[..]).unwrap();
    assert_eq!(all.metrics.precision, 0.741);
  }

  #[test]
  fn no_table_is_none() {
    assert!(parse_summary(&["nothing to see"][..]).is_none());
  }

  #[test]
  fn well_formed_requires_ordered_maps() {
    let m = BoxMetrics {
      precision: 0.5,
      recall: 0.5,
      map50: 0.3,
      map50_95: 0.4,
    };
    assert!(!m.is_well_formed());
  }

  #[test]
  fn report_prints_four_fields() {
    let (all, classes) = parse_summary(VAL_OUTPUT).unwrap();
    let report = ValReport::new(all, classes, None);
    assert_eq!(report.precision(), vec![0.741]);
    assert_eq!(report.confusion_matrix, None);
    let text = report.to_string();
    assert!(text.contains("Precision: [0.74100]"));
    assert!(text.contains("Recall: [0.64100]"));
    assert!(text.contains("mAP50: 0.71100"));
    assert!(text.ends_with("mAP50-95: 0.42700"));
  }
}
