// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/output/labels.rs - YOLO 标签文本读写
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

//! 每行一个目标：`class cx cy w h [conf]`，坐标为相对图片宽高的归一化中心格式。

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::model::{DetectItem, DetectResult, WithLabel};
use crate::output::ImageDetections;

pub const LABELS_DIR: &str = "labels";

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签格式错误 {}:{line}: {reason}", path.display())]
  Malformed {
    path: PathBuf,
    line: usize,
    reason: String,
  },
}

/// 没有置信度列时的默认置信度
const MISSING_CONFIDENCE: f32 = 1.0;

pub fn format_line<T: WithLabel>(item: &DetectItem<T>, with_confidence: bool) -> String {
  let [x_min, y_min, x_max, y_max] = item.bbox;
  let cx = (x_min + x_max) / 2.0;
  let cy = (y_min + y_max) / 2.0;
  let w = x_max - x_min;
  let h = y_max - y_min;
  let mut line = format!(
    "{} {:.6} {:.6} {:.6} {:.6}",
    item.kind.to_label_id(),
    cx,
    cy,
    w,
    h
  );
  if with_confidence {
    line.push_str(&format!(" {:.6}", item.score));
  }
  line
}

pub fn write_file<T: WithLabel>(
  path: &Path,
  result: &DetectResult<T>,
  with_confidence: bool,
) -> Result<(), LabelError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  let mut text = String::new();
  for item in result.items.iter() {
    text.push_str(&format_line(item, with_confidence));
    text.push('\n');
  }
  std::fs::write(path, text)?;
  Ok(())
}

pub fn parse<T: WithLabel>(text: &str, path: &Path) -> Result<DetectResult<T>, LabelError> {
  let malformed = |line: usize, reason: String| LabelError::Malformed {
    path: path.to_path_buf(),
    line,
    reason,
  };

  let mut items = Vec::new();
  for (index, line) in text.lines().enumerate() {
    let line_no = index + 1;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.is_empty() {
      continue;
    }
    if fields.len() != 5 && fields.len() != 6 {
      return Err(malformed(
        line_no,
        format!("期望 5 或 6 列，实际 {} 列", fields.len()),
      ));
    }

    let class_id: u32 = fields[0]
      .parse()
      .map_err(|_| malformed(line_no, format!("类别编号无效: {}", fields[0])))?;
    let mut values = [0f32; 5];
    for (slot, field) in values.iter_mut().zip(&fields[1..]) {
      *slot = field
        .parse()
        .map_err(|_| malformed(line_no, format!("数值无效: {}", field)))?;
    }
    let [cx, cy, w, h, _] = values;
    let score = if fields.len() == 6 {
      values[4]
    } else {
      MISSING_CONFIDENCE
    };

    items.push(DetectItem {
      kind: T::from_label_id(class_id),
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  Ok(items.into())
}

pub fn read_file<T: WithLabel>(path: &Path) -> Result<DetectResult<T>, LabelError> {
  let text = std::fs::read_to_string(path)?;
  parse(&text, path)
}

/// 读取结果目录下 `labels/` 中的全部标签文件，按文件名排序；目录不存在时返回空
pub fn read_dir(save_dir: &Path) -> Result<Vec<ImageDetections>, LabelError> {
  let dir = save_dir.join(LABELS_DIR);
  if !dir.is_dir() {
    debug!("结果目录中没有标签目录: {}", dir.display());
    return Ok(Vec::new());
  }

  let mut paths = Vec::new();
  for entry in std::fs::read_dir(&dir)? {
    let path = entry?.path();
    if path.extension().is_some_and(|ext| ext == "txt") {
      paths.push(path);
    }
  }
  paths.sort();

  paths
    .into_iter()
    .map(|path| {
      let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
      Ok(ImageDetections {
        name,
        result: read_file(&path)?,
      })
    })
    .collect()
}
