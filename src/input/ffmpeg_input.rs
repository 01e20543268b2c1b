// 该文件是 Extinguisher 项目的一部分。
// src/input/ffmpeg_input.rs - 基于 ffmpeg 命令行的视频解码输入
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

//! # ffmpeg 视频输入
//!
//! 通过 `ffprobe` 读取视频流的尺寸和帧率，再由 `ffmpeg` 把视频解码为
//! RGB24 原始帧并经管道传出。需要系统中安装 ffmpeg。
//!
//! URL 格式：`video:///path/to/input.mp4`

use std::{
  io::{ErrorKind, Read},
  path::{Path, PathBuf},
  process::{Child, ChildStdout, Command, Stdio},
};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, StreamInfo, UrlPathError, ffmpeg::StderrTail, input::FrameSource,
  url_file_path,
};

use super::InputError;

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid path: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("ffprobe failed: {0}")]
  ProbeFailed(String),
  #[error("Invalid ffprobe output: {0}")]
  ProbeOutput(#[from] serde_json::Error),
  #[error("No video stream found")]
  NoVideoStream,
  #[error("Invalid frame rate: {0}")]
  InvalidFrameRate(String),
  #[error("Invalid frame size: {width}x{height}")]
  InvalidFrameSize { width: u32, height: u32 },
  #[error("ffmpeg decode failed: {0}")]
  DecodeFailed(String),
  #[error("Truncated frame: expected {expected} bytes, got {actual} bytes")]
  TruncatedFrame { expected: usize, actual: usize },
}

#[derive(Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
  width: u32,
  height: u32,
  #[serde(default)]
  avg_frame_rate: Option<String>,
  r_frame_rate: String,
}

/// ffmpeg 视频输入
pub struct FfmpegVideoInput {
  child: Child,
  stdout: ChildStdout,
  stderr: StderrTail,
  info: StreamInfo,
  path: PathBuf,
  frames_read: u64,
  finished: bool,
}

impl FromUrlWithScheme for FfmpegVideoInput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for FfmpegVideoInput {
  type Error = FfmpegInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FfmpegInputError::SchemeMismatch);
    }
    Self::open(url_file_path(url)?)
  }
}

impl FfmpegVideoInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, FfmpegInputError> {
    let path = path.as_ref();
    let info = probe(path)?;
    info!("视频流信息: {} -> {}", path.display(), info);

    let mut child = decode_command(path).spawn()?;
    let pipes = match (child.stdout.take(), child.stderr.take()) {
      (Some(stdout), Some(stderr)) => StderrTail::spawn(stderr).map(|tail| (stdout, tail)),
      _ => Err(std::io::Error::other("ffmpeg pipes unavailable")),
    };
    let (stdout, stderr) = match pipes {
      Ok(pipes) => pipes,
      Err(e) => {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e.into());
      }
    };

    Ok(FfmpegVideoInput {
      child,
      stdout,
      stderr,
      info,
      path: path.to_path_buf(),
      frames_read: 0,
      finished: false,
    })
  }

  fn read_frame(&mut self) -> Result<Option<RgbImage>, FfmpegInputError> {
    if self.finished {
      return Ok(None);
    }

    let expected = self.info.frame_size();
    let mut buffer = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
      match self.stdout.read(&mut buffer[filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => {
          self.finished = true;
          return Err(e.into());
        }
      }
    }

    if filled == 0 {
      self.finished = true;
      let status = self.child.wait()?;
      if status.success() {
        info!(
          "视频解码结束: {} ({} 帧)",
          self.path.display(),
          self.frames_read
        );
        return Ok(None);
      }
      return Err(FfmpegInputError::DecodeFailed(self.stderr_message(status)));
    }

    if filled < expected {
      self.finished = true;
      return Err(FfmpegInputError::TruncatedFrame {
        expected,
        actual: filled,
      });
    }

    self.frames_read += 1;
    RgbImage::from_raw(self.info.width, self.info.height, buffer)
      .map(Some)
      .ok_or(FfmpegInputError::TruncatedFrame {
        expected,
        actual: filled,
      })
  }

  fn stderr_message(&mut self, status: std::process::ExitStatus) -> String {
    let stderr = self.stderr.collect();
    if stderr.is_empty() {
      format!("ffmpeg exited with {}", status)
    } else {
      stderr
    }
  }
}

impl FrameSource for FfmpegVideoInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(self.read_frame()?)
  }
}

impl Drop for FfmpegVideoInput {
  fn drop(&mut self) {
    if !self.finished {
      if let Err(e) = self.child.kill() {
        warn!("无法停止 ffmpeg 解码进程: {}", e);
      }
    }
    if let Err(e) = self.child.wait() {
      warn!("等待 ffmpeg 解码进程退出失败: {}", e);
    }
    info!(
      "视频输入已关闭: {} (读取 {} 帧)",
      self.path.display(),
      self.frames_read
    );
  }
}

/// 解码命令：按存储方向输出帧，宽高与 ffprobe 读到的一致；
/// 逐帧透传时间戳，帧数与输入一致
fn decode_command(path: &Path) -> Command {
  let mut command = Command::new("ffmpeg");
  command
    .arg("-nostdin")
    .arg("-loglevel")
    .arg("error")
    .arg("-noautorotate")
    .arg("-i")
    .arg(path)
    .arg("-vsync")
    .arg("passthrough")
    .arg("-f")
    .arg("rawvideo")
    .arg("-pix_fmt")
    .arg("rgb24")
    .arg("pipe:1")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
  command
}

fn probe(path: &Path) -> Result<StreamInfo, FfmpegInputError> {
  let output = Command::new("ffprobe")
    .arg("-v")
    .arg("error")
    .arg("-select_streams")
    .arg("v:0")
    .arg("-show_entries")
    .arg("stream=width,height,avg_frame_rate,r_frame_rate")
    .arg("-of")
    .arg("json")
    .arg(path)
    .stdin(Stdio::null())
    .output()?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    error!("ffprobe 错误: {}", stderr);
    return Err(FfmpegInputError::ProbeFailed(stderr));
  }

  parse_probe(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe(json: &str) -> Result<StreamInfo, FfmpegInputError> {
  let output: ProbeOutput = serde_json::from_str(json)?;
  let stream = output
    .streams
    .into_iter()
    .next()
    .ok_or(FfmpegInputError::NoVideoStream)?;

  if stream.width == 0 || stream.height == 0 {
    return Err(FfmpegInputError::InvalidFrameSize {
      width: stream.width,
      height: stream.height,
    });
  }

  // 优先使用平均帧率，不可用时退回到 r_frame_rate
  let (fps_num, fps_den) = stream
    .avg_frame_rate
    .as_deref()
    .and_then(|rate| parse_rate(rate).ok())
    .map_or_else(|| parse_rate(&stream.r_frame_rate), Ok)?;

  Ok(StreamInfo {
    width: stream.width,
    height: stream.height,
    fps_num,
    fps_den,
  })
}

fn parse_rate(rate: &str) -> Result<(u32, u32), FfmpegInputError> {
  let invalid = || FfmpegInputError::InvalidFrameRate(rate.to_string());
  let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
  let num = num.trim().parse::<u32>().map_err(|_| invalid())?;
  let den = den.trim().parse::<u32>().map_err(|_| invalid())?;
  if num == 0 || den == 0 {
    return Err(invalid());
  }
  Ok((num, den))
}
