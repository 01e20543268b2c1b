// 该文件是 Extinguisher 项目的一部分。
// src/output/ffmpeg_output.rs - 基于 ffmpeg 命令行的视频编码输出
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

//! # ffmpeg 视频输出
//!
//! 把 RGB24 原始帧经管道写入 `ffmpeg` 进程，由其编码并封装为视频文件。
//! 帧率与尺寸取自输入流，编码器通过 `?codec=` 选择。
//!
//! URL 格式：`video:///path/to/output.mp4?codec=h264`

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  process::{Child, ChildStdin, Command, Stdio},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  StreamInfo, UrlPathError,
  ffmpeg::{StderrTail, encoder_available},
  output::{FrameSink, OutputError, VideoCodec},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum FfmpegOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid path: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("Output file not writable {path}: {source}")]
  Unwritable {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("ffmpeg has no encoder '{0}'")]
  EncoderUnavailable(&'static str),
  #[error("Invalid stream: {0}")]
  InvalidStream(StreamInfo),
  #[error("ffmpeg encode failed: {0}")]
  EncodeFailed(String),
}

/// ffmpeg 视频输出
pub struct FfmpegVideoOutput {
  child: Child,
  stdin: Option<ChildStdin>,
  stderr: StderrTail,
  path: PathBuf,
  info: StreamInfo,
  frames_written: u64,
  closed: bool,
}

impl FfmpegVideoOutput {
  pub const SCHEME: &'static str = "video";

  /// 创建输出；输出文件不可写或编码器不存在时在这里失败，不会等到写帧
  pub fn create(url: &Url, info: &StreamInfo) -> Result<Self, OutputError> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FfmpegOutputError::SchemeMismatch.into());
    }
    if info.width == 0 || info.height == 0 || info.fps_num == 0 || info.fps_den == 0 {
      return Err(FfmpegOutputError::InvalidStream(*info).into());
    }
    let codec = VideoCodec::from_url(url)?;

    let path = url_file_path(url).map_err(FfmpegOutputError::from)?;
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(FfmpegOutputError::from)?;
    }
    touch_output(&path)?;

    match Self::spawn(path.clone(), info, codec) {
      Ok(output) => Ok(output),
      Err(e) => {
        let _ = std::fs::remove_file(&path);
        Err(e.into())
      }
    }
  }

  fn spawn(
    path: PathBuf,
    info: &StreamInfo,
    codec: VideoCodec,
  ) -> Result<Self, FfmpegOutputError> {
    let encoder = codec.ffmpeg_encoder();
    if !encoder_available(encoder)? {
      error!("ffmpeg 缺少编码器: {}", encoder);
      return Err(FfmpegOutputError::EncoderUnavailable(encoder));
    }

    info!("创建视频输出: {} ({}, {})", path.display(), info, encoder);

    let mut child = Command::new("ffmpeg")
      .arg("-y") // 覆盖已存在的文件
      .arg("-loglevel")
      .arg("error")
      .arg("-f")
      .arg("rawvideo")
      .arg("-pix_fmt")
      .arg("rgb24")
      .arg("-s")
      .arg(format!("{}x{}", info.width, info.height))
      .arg("-r")
      .arg(format!("{}/{}", info.fps_num, info.fps_den))
      .arg("-i")
      .arg("pipe:0")
      .arg("-c:v")
      .arg(encoder)
      .arg("-pix_fmt")
      .arg("yuv420p") // 兼容性格式
      .arg(&path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()?;

    let stderr = match child.stderr.take().map(StderrTail::spawn) {
      Some(Ok(tail)) => tail,
      other => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(match other {
          Some(Err(e)) => e.into(),
          _ => FfmpegOutputError::EncodeFailed("ffmpeg stderr unavailable".to_string()),
        });
      }
    };

    let stdin = child.stdin.take();
    Ok(FfmpegVideoOutput {
      child,
      stdin,
      stderr,
      path,
      info: *info,
      frames_written: 0,
      closed: false,
    })
  }

  fn stderr_message(&mut self) -> String {
    self.stderr.collect()
  }
}

/// 预先创建输出文件，确认路径可写
fn touch_output(path: &Path) -> Result<(), FfmpegOutputError> {
  OpenOptions::new()
    .write(true)
    .create(true)
    .truncate(true)
    .open(path)
    .map(drop)
    .map_err(|source| {
      error!("输出文件不可写 {}: {}", path.display(), source);
      FfmpegOutputError::Unwritable {
        path: path.to_path_buf(),
        source,
      }
    })
}

impl FrameSink for FfmpegVideoOutput {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    if self.closed {
      return Err(OutputError::Closed);
    }
    OutputError::check_frame_size(&self.info, frame)?;

    let stdin = self.stdin.as_mut().ok_or(OutputError::Closed)?;
    if let Err(e) = stdin.write_all(frame.as_raw()) {
      // 写入失败通常是 ffmpeg 已经退出，stderr 中有原因
      self.stdin = None;
      let _ = self.child.wait();
      let message = self.stderr_message();
      error!("ffmpeg 错误: {} ({})", message, e);
      return Err(FfmpegOutputError::EncodeFailed(if message.is_empty() {
        e.to_string()
      } else {
        message
      })
      .into());
    }
    self.frames_written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    // 关闭 stdin，ffmpeg 读到 EOF 后写完文件尾
    drop(self.stdin.take());
    let status = self.child.wait().map_err(FfmpegOutputError::from)?;
    if !status.success() {
      let message = self.stderr_message();
      error!("ffmpeg 错误: {}", message);
      return Err(FfmpegOutputError::EncodeFailed(format!("{} ({})", message, status)).into());
    }

    info!(
      "视频已保存到文件: {} ({} 帧)",
      self.path.display(),
      self.frames_written
    );
    Ok(())
  }

  fn discard(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;

    drop(self.stdin.take());
    if let Err(e) = self.child.kill() {
      warn!("无法停止 ffmpeg 编码进程: {}", e);
    }
    let _ = self.child.wait();
    if self.path.exists()
      && let Err(e) = std::fs::remove_file(&self.path)
    {
      warn!("删除不完整的视频文件失败 {}: {}", self.path.display(), e);
    }
    warn!("已放弃视频输出: {}", self.path.display());
  }
}

impl Drop for FfmpegVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      error!("编码视频时出错: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn info() -> StreamInfo {
    StreamInfo {
      width: 4,
      height: 4,
      fps_num: 25,
      fps_den: 1,
    }
  }

  #[test]
  fn unwritable_output_fails_at_create() {
    let dir = tempfile::tempdir().unwrap();
    // 目标是已存在的目录，无法作为文件打开
    let target = dir.path().join("clip.mp4");
    std::fs::create_dir(&target).unwrap();
    let url = Url::parse(&format!("video://{}", target.display())).unwrap();

    assert!(matches!(
      FfmpegVideoOutput::create(&url, &info()),
      Err(OutputError::FfmpegOutputError(
        FfmpegOutputError::Unwritable { .. }
      ))
    ));
    assert!(target.is_dir());
  }

  #[test]
  fn empty_stream_is_rejected_before_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("clip.mp4");
    let url = Url::parse(&format!("video://{}", target.display())).unwrap();
    let empty = StreamInfo {
      width: 0,
      ..info()
    };

    assert!(matches!(
      FfmpegVideoOutput::create(&url, &empty),
      Err(OutputError::FfmpegOutputError(
        FfmpegOutputError::InvalidStream(_)
      ))
    ));
    assert!(!target.exists());
  }
}
