// 该文件是 Extinguisher 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  StreamInfo, UrlPathError,
  output::{FrameSink, OutputError},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("路径无效: {0}")]
  InvalidPath(#[from] UrlPathError),
}

/// 目录记录输出
///
/// `folder:///path/to/frames` 把每一帧保存为 `frame_000001.png` 形式的文件。
/// 放弃输出时删除已写入的帧，目录由本输出创建时一并删除。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  info: StreamInfo,
  written: Vec<PathBuf>,
  created_directory: bool,
  closed: bool,
}

impl DirectoryRecordOutput {
  pub const SCHEME: &'static str = "folder";

  pub fn create(uri: &Url, info: &StreamInfo) -> Result<Self, DirectoryRecordOutputError> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let directory = url_file_path(uri)?;
    let created_directory = !directory.exists();
    if created_directory {
      std::fs::create_dir_all(&directory)?;
    }
    info!("帧记录目录: {} ({})", directory.display(), info);

    Ok(DirectoryRecordOutput {
      directory,
      info: *info,
      written: Vec::new(),
      created_directory,
      closed: false,
    })
  }

  pub fn frames_written(&self) -> usize {
    self.written.len()
  }

  fn frame_path(&self) -> PathBuf {
    self
      .directory
      .join(format!("frame_{:06}.png", self.written.len() + 1))
  }
}

impl FrameSink for DirectoryRecordOutput {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    if self.closed {
      return Err(OutputError::Closed);
    }
    OutputError::check_frame_size(&self.info, frame)?;

    let path = self.frame_path();
    frame
      .save_with_format(&path, image::ImageFormat::Png)
      .map_err(DirectoryRecordOutputError::from)?;
    self.written.push(path);
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if !self.closed {
      self.closed = true;
      info!(
        "帧记录完成: {} ({} 帧)",
        self.directory.display(),
        self.written.len()
      );
    }
    Ok(())
  }

  fn discard(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;

    for path in self.written.drain(..) {
      if let Err(e) = std::fs::remove_file(&path) {
        warn!("删除帧文件失败 {}: {}", path.display(), e);
      }
    }
    if self.created_directory
      && let Err(e) = std::fs::remove_dir(&self.directory)
    {
      warn!("删除目录失败 {}: {}", self.directory.display(), e);
    }
    warn!("已放弃帧记录输出: {}", self.directory.display());
  }
}
