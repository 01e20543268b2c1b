// 该文件是 Extinguisher 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::RgbImage;
use thiserror::Error;

use crate::{FromUrl, StreamInfo};

/// 顺序读取的帧来源
///
/// 帧尺寸与帧率在整个读取过程中保持不变。来源被 drop 时释放底层资源。
pub trait FrameSource {
  fn stream_info(&self) -> StreamInfo;

  /// 读取下一帧；`Ok(None)` 表示正常结束
  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn stream_info(&self) -> StreamInfo {
    (**self).stream_info()
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    (**self).next_frame()
  }
}

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod image_sequence;
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

#[cfg(feature = "ffmpeg_video")]
mod ffmpeg_input;
#[cfg(feature = "ffmpeg_video")]
pub use self::ffmpeg_input::{FfmpegInputError, FfmpegVideoInput};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("Image sequence input error: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[cfg(feature = "ffmpeg_video")]
  #[error("FFmpeg input error: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Frame decode error: {0}")]
  Decode(String),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "ffmpeg_video")]
  Ffmpeg(FfmpegVideoInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    #[cfg(feature = "ffmpeg_video")]
    {
      if url.scheme() == FfmpegVideoInput::SCHEME {
        return Ok(InputWrapper::Ffmpeg(FfmpegVideoInput::from_url(url)?));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInput::SCHEME {
        return Ok(InputWrapper::GStreamerInput(GStreamerInput::from_url(url)?));
      }
    }
    if url.scheme() == ImageSequenceInput::SCHEME {
      return Ok(InputWrapper::ImageSequence(ImageSequenceInput::from_url(
        url,
      )?));
    }
    if ImageFileInput::accepts(url) {
      return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn stream_info(&self) -> StreamInfo {
    match self {
      InputWrapper::ReadImageFile(input) => input.stream_info(),
      InputWrapper::ImageSequence(input) => input.stream_info(),
      #[cfg(feature = "ffmpeg_video")]
      InputWrapper::Ffmpeg(input) => input.stream_info(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.stream_info(),
    }
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next_frame(),
      InputWrapper::ImageSequence(input) => input.next_frame(),
      #[cfg(feature = "ffmpeg_video")]
      InputWrapper::Ffmpeg(input) => input.next_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame(),
    }
  }
}
