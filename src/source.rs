// 该文件是 Pothole （路面坑洼检测） 项目的一部分。
// src/source.rs - 推理输入来源
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

use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

/// 检测库可识别的图片扩展名
pub const IMAGE_EXTENSIONS: [&str; 11] = [
  "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm", "heic",
];

/// 检测库可识别的视频扩展名
pub const VIDEO_EXTENSIONS: [&str; 12] = [
  "asf", "avi", "gif", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ts", "wmv", "webm",
];

const STREAM_SCHEMES: [&str; 5] = ["rtsp://", "rtmp://", "http://", "https://", "tcp://"];

/// 推理输入来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
  /// 单个图片或视频文件
  File(PathBuf),
  /// 包含图片/视频的目录
  Directory(PathBuf),
  /// 摄像头设备编号
  Device(u32),
  /// 网络视频流
  Stream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn of(path: &Path) -> Option<Self> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
      Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
      Some(MediaKind::Video)
    } else {
      None
    }
  }
}

impl FromStr for Source {
  type Err = Infallible;

  /// 纯数字视为摄像头编号，流媒体 URL 视为视频流，已存在的目录视为目录，其余一律视为文件。
  /// 文件是否存在不在此处检查，交由检测库处理。
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.bytes().all(|b| b.is_ascii_digit())
      && let Ok(index) = s.parse()
    {
      return Ok(Source::Device(index));
    }
    let lower = s.to_ascii_lowercase();
    if STREAM_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
      return Ok(Source::Stream(s.to_string()));
    }
    let path = PathBuf::from(s);
    if path.is_dir() {
      Ok(Source::Directory(path))
    } else {
      Ok(Source::File(path))
    }
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Source::File(path) | Source::Directory(path) => write!(f, "{}", path.display()),
      Source::Device(index) => write!(f, "{}", index),
      Source::Stream(url) => write!(f, "{}", url),
    }
  }
}

impl Source {
  /// 列出来源中的媒体文件（按文件名排序）。
  ///
  /// 摄像头与视频流没有可枚举的文件，返回 `None`；
  /// 单个文件原样返回，不检查扩展名。
  pub fn media_files(&self) -> std::io::Result<Option<Vec<PathBuf>>> {
    match self {
      Source::File(path) => Ok(Some(vec![path.clone()])),
      Source::Directory(dir) => {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
          let path = entry?.path();
          if path.is_file() && MediaKind::of(&path).is_some() {
            files.push(path);
          }
        }
        files.sort();
        debug!("目录 {} 中找到 {} 个媒体文件", dir.display(), files.len());
        Ok(Some(files))
      }
      Source::Device(_) | Source::Stream(_) => Ok(None),
    }
  }

  /// 目录来源且其中没有任何媒体文件
  pub fn is_empty_directory(&self) -> std::io::Result<bool> {
    match self {
      Source::Directory(_) => Ok(self.media_files()?.is_some_and(|files| files.is_empty())),
      _ => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digits_parse_as_device() {
    assert_eq!("0".parse::<Source>().unwrap(), Source::Device(0));
    assert_eq!(" 2 ".parse::<Source>().unwrap(), Source::Device(2));
  }

  #[test]
  fn stream_urls_are_kept_verbatim() {
    let source: Source = "rtsp://camera.local/stream1".parse().unwrap();
    assert_eq!(source, Source::Stream("rtsp://camera.local/stream1".into()));
  }

  #[test]
  fn missing_path_is_a_file() {
    let source: Source = "no/such/pothole.jpg".parse().unwrap();
    assert_eq!(source, Source::File(PathBuf::from("no/such/pothole.jpg")));
  }

  #[test]
  fn directory_lists_only_media() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.JPG"), b"").unwrap();
    std::fs::write(dir.path().join("a.png"), b"").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
    std::fs::write(dir.path().join("clip.mp4"), b"").unwrap();

    let source: Source = dir.path().to_str().unwrap().parse().unwrap();
    let files = source.media_files().unwrap().unwrap();
    let names: Vec<_> = files
      .iter()
      .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
      .collect();
    assert_eq!(names, ["a.png", "b.JPG", "clip.mp4"]);
    assert!(!source.is_empty_directory().unwrap());
  }

  #[test]
  fn empty_directory_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("readme.md"), b"").unwrap();
    let source = Source::Directory(dir.path().to_path_buf());
    assert!(source.is_empty_directory().unwrap());
    assert!(!Source::Device(0).is_empty_directory().unwrap());
  }
}
