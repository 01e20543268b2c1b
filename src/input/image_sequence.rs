// 该文件是 Extinguisher 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, StreamInfo, UrlPathError, input::FrameSource, url_file_path,
};

use super::InputError;

const DEFAULT_FPS: u32 = 25;
const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 120;
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("路径无效: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("无法解码帧 {path}: {source}")]
  DecodeError {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("目录中没有图像帧: {0}")]
  NoFrames(PathBuf),
  #[error("帧率 {0} 超出范围 (1-120)")]
  InvalidFps(u32),
  #[error("帧 {path} 尺寸为 {actual:?}，与首帧 {expected:?} 不一致")]
  SizeMismatch {
    path: PathBuf,
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// 图像序列输入
///
/// `folder:///path/to/frames?fps=25` 按文件名顺序读取目录中的图像，
/// 每张图像作为一帧。尺寸取自第一帧。
pub struct ImageSequenceInput {
  pending: VecDeque<PathBuf>,
  first: Option<RgbImage>,
  info: StreamInfo,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<u32>().ok())
      .unwrap_or(DEFAULT_FPS);

    Self::open(url_file_path(url)?, fps)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: impl AsRef<Path>, fps: u32) -> Result<Self, ImageSequenceInputError> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
      return Err(ImageSequenceInputError::InvalidFps(fps));
    }

    let directory = directory.as_ref();
    let mut frames = std::fs::read_dir(directory)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_frame_file(path))
      .collect::<Vec<_>>();
    frames.sort();

    let mut pending = VecDeque::from(frames);
    let first_path = pending
      .pop_front()
      .ok_or_else(|| ImageSequenceInputError::NoFrames(directory.to_path_buf()))?;
    let first = load_frame(&first_path)?;
    let (width, height) = first.dimensions();

    info!(
      "打开图像序列: {} ({} 帧, {}x{} @ {} fps)",
      directory.display(),
      pending.len() + 1,
      width,
      height,
      fps
    );

    Ok(ImageSequenceInput {
      pending,
      first: Some(first),
      info: StreamInfo {
        width,
        height,
        fps_num: fps,
        fps_den: 1,
      },
    })
  }
}

impl FrameSource for ImageSequenceInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    if let Some(first) = self.first.take() {
      return Ok(Some(first));
    }
    let Some(path) = self.pending.pop_front() else {
      return Ok(None);
    };

    debug!("读取帧: {}", path.display());
    let frame = load_frame(&path)?;
    let expected = (self.info.width, self.info.height);
    if frame.dimensions() != expected {
      return Err(
        ImageSequenceInputError::SizeMismatch {
          path,
          expected,
          actual: frame.dimensions(),
        }
        .into(),
      );
    }
    Ok(Some(frame))
  }
}

fn is_frame_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

fn load_frame(path: &Path) -> Result<RgbImage, ImageSequenceInputError> {
  image::open(path)
    .map(|image| image.into_rgb8())
    .map_err(|source| ImageSequenceInputError::DecodeError {
      path: path.to_path_buf(),
      source,
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn write_frames(dir: &Path, count: u8) {
    for i in 0..count {
      RgbImage::from_pixel(4, 4, Rgb([i, 0, 0]))
        .save(dir.join(format!("frame_{:03}.png", i)))
        .unwrap();
    }
  }

  #[test]
  fn reads_frames_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 3);
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let url = Url::parse(&format!("folder://{}?fps=10", dir.path().display())).unwrap();
    let mut input = ImageSequenceInput::from_url(&url).unwrap();
    assert_eq!(input.stream_info().fps_num, 10);

    for i in 0..3 {
      let frame = input.next_frame().unwrap().unwrap();
      assert_eq!(*frame.get_pixel(0, 0), Rgb([i, 0, 0]));
    }
    assert!(input.next_frame().unwrap().is_none());
  }

  #[test]
  fn folder_url_with_space_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let frames = dir.path().join("drone footage");
    std::fs::create_dir(&frames).unwrap();
    write_frames(&frames, 2);

    let url = Url::parse(&format!("folder://{}", frames.display())).unwrap();
    let input = ImageSequenceInput::from_url(&url).unwrap();
    assert_eq!(input.stream_info().fps_num, DEFAULT_FPS);
  }

  #[test]
  fn corrupt_frame_is_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 1);
    std::fs::write(dir.path().join("frame_001.png"), b"not a png").unwrap();

    let mut input = ImageSequenceInput::open(dir.path(), 25).unwrap();
    assert!(input.next_frame().unwrap().is_some());
    assert!(matches!(
      input.next_frame(),
      Err(InputError::ImageSequenceInputError(
        ImageSequenceInputError::DecodeError { .. }
      ))
    ));
  }

  #[test]
  fn empty_directory_has_no_frames() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageSequenceInput::open(dir.path(), 25),
      Err(ImageSequenceInputError::NoFrames(_))
    ));
  }

  #[test]
  fn fps_out_of_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 1);
    assert!(matches!(
      ImageSequenceInput::open(dir.path(), 0),
      Err(ImageSequenceInputError::InvalidFps(0))
    ));
  }
}
