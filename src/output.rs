// 该文件是 Extinguisher 项目的一部分。
// src/output.rs - 输出模块
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

use std::str::FromStr;

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::StreamInfo;

/// 顺序写入的帧输出
///
/// 所有帧的尺寸必须与创建时给定的 [`StreamInfo`] 一致。
/// `finish` 正常封装输出；`discard` 停止写入并删除不完整的产物。
/// 两者都没有调用就被 drop 时，按 `finish` 处理。
pub trait FrameSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError>;

  fn finish(&mut self) -> Result<(), OutputError>;

  fn discard(&mut self);
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }

  fn discard(&mut self) {
    (**self).discard()
  }
}

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput, encode_png};

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[cfg(feature = "ffmpeg_video")]
mod ffmpeg_output;
#[cfg(feature = "ffmpeg_video")]
pub use self::ffmpeg_output::{FfmpegOutputError, FfmpegVideoOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("Directory record output error: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "ffmpeg_video")]
  #[error("FFmpeg output error: {0}")]
  FfmpegOutputError(#[from] FfmpegOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer video output error: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("Unknown video codec: {0}")]
  UnknownCodec(String),
  #[error("Sink already closed")]
  Closed,
  #[error("Frame write error: {0}")]
  Write(String),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

impl OutputError {
  pub fn check_frame_size(info: &StreamInfo, frame: &RgbImage) -> Result<(), OutputError> {
    let expected = (info.width, info.height);
    let actual = frame.dimensions();
    if expected != actual {
      return Err(OutputError::FrameSizeMismatch { expected, actual });
    }
    Ok(())
  }
}

/// 输出视频编码，通过 `?codec=` 查询参数选择，默认 H.264
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
  #[default]
  H264,
  Mpeg4,
}

impl VideoCodec {
  pub fn from_url(url: &Url) -> Result<Self, OutputError> {
    url
      .query_pairs()
      .find(|(k, _)| k == "codec")
      .map_or(Ok(VideoCodec::default()), |(_, v)| v.parse())
  }

  pub fn ffmpeg_encoder(&self) -> &'static str {
    match self {
      VideoCodec::H264 => "libx264",
      VideoCodec::Mpeg4 => "mpeg4",
    }
  }

  pub fn gstreamer_encoder(&self) -> &'static str {
    match self {
      VideoCodec::H264 => "x264enc speed-preset=fast ! h264parse",
      VideoCodec::Mpeg4 => "avenc_mpeg4 ! mpeg4videoparse",
    }
  }
}

impl FromStr for VideoCodec {
  type Err = OutputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "h264" | "avc" | "x264" => Ok(VideoCodec::H264),
      "mpeg4" | "mp4v" | "xvid" => Ok(VideoCodec::Mpeg4),
      other => Err(OutputError::UnknownCodec(other.to_string())),
    }
  }
}

pub enum OutputWrapper {
  DirectoryRecord(DirectoryRecordOutput),
  #[cfg(feature = "ffmpeg_video")]
  Ffmpeg(FfmpegVideoOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideo(GStreamerVideoOutput),
}

impl OutputWrapper {
  /// 按 URL scheme 创建输出，帧尺寸与帧率取自输入流
  pub fn create(url: &Url, info: &StreamInfo) -> Result<Self, OutputError> {
    #[cfg(feature = "ffmpeg_video")]
    {
      if url.scheme() == FfmpegVideoOutput::SCHEME {
        return Ok(OutputWrapper::Ffmpeg(FfmpegVideoOutput::create(url, info)?));
      }
    }
    #[cfg(feature = "gstreamer_output")]
    {
      if url.scheme() == GStreamerVideoOutput::SCHEME {
        return Ok(OutputWrapper::GStreamerVideo(GStreamerVideoOutput::create(
          url, info,
        )?));
      }
    }
    if url.scheme() == DirectoryRecordOutput::SCHEME {
      return Ok(OutputWrapper::DirectoryRecord(DirectoryRecordOutput::create(
        url, info,
      )?));
    }
    Err(OutputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSink for OutputWrapper {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.write_frame(frame),
      #[cfg(feature = "ffmpeg_video")]
      OutputWrapper::Ffmpeg(output) => output.write_frame(frame),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideo(output) => output.write_frame(frame),
    }
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.finish(),
      #[cfg(feature = "ffmpeg_video")]
      OutputWrapper::Ffmpeg(output) => output.finish(),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideo(output) => output.finish(),
    }
  }

  fn discard(&mut self) {
    match self {
      OutputWrapper::DirectoryRecord(output) => output.discard(),
      #[cfg(feature = "ffmpeg_video")]
      OutputWrapper::Ffmpeg(output) => output.discard(),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideo(output) => output.discard(),
    }
  }
}
