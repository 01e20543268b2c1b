// 该文件是 Extinguisher 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的帧编码保存为视频文件，容器由扩展名决定：
//!
//! - **MP4** / **MKV** / **AVI** - 使用 `?codec=` 选择的编码器（默认 H.264）
//! - **WebM** - VP8
//!
//! URL 格式：`gstvideo:///output.mp4?codec=h264`

use std::path::PathBuf;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  StreamInfo, UrlPathError, gst_launch_quote,
  output::{FrameSink, OutputError, VideoCodec},
};

// 等待 EOS 写完文件尾的上限（秒）
const EOS_TIMEOUT_SECS: u64 = 30;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid path: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
  #[error("Invalid stream: {0}")]
  InvalidStream(StreamInfo),
}

/// GStreamer 视频文件输出
///
/// 管理 GStreamer 编码管道，将视频帧保存为文件。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  info: StreamInfo,
  frame_count: u64,
  closed: bool,
}

impl GStreamerVideoOutput {
  pub const SCHEME: &'static str = "gstvideo";

  pub fn create(url: &Url, info: &StreamInfo) -> Result<Self, OutputError> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch.into());
    }
    if info.width == 0 || info.height == 0 || info.fps_num == 0 || info.fps_den == 0 {
      return Err(GStreamerVideoOutputError::InvalidStream(*info).into());
    }
    let codec = VideoCodec::from_url(url)?;
    let path = crate::url_file_path(url).map_err(GStreamerVideoOutputError::from)?;
    Ok(Self::launch(path, info, codec)?)
  }

  fn launch(
    path: PathBuf,
    info: &StreamInfo,
    codec: VideoCodec,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let file_path = gst_launch_quote(&path);
    let encoder = codec.gstreamer_encoder();
    let pipeline_desc = match path.extension().and_then(|ext| ext.to_str()) {
      Some("mkv") => format!(
        "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! matroskamux ! filesink location={}",
        encoder, file_path
      ),
      Some("avi") => format!(
        "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! avimux ! filesink location={}",
        encoder, file_path
      ),
      Some("webm") => format!(
        "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location={}",
        file_path
      ),
      _ => format!(
        "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! mp4mux ! filesink location={}",
        encoder, file_path
      ),
    };

    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", info.width as i32)
      .field("height", info.height as i32)
      .field(
        "framerate",
        gst::Fraction::new(info.fps_num as i32, info.fps_den as i32),
      )
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!("Video output initialized: {} -> {}", info, file_path);

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      path,
      info: *info,
      frame_count: 0,
      closed: false,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let mut buffer = gst::Buffer::from_slice(data.to_vec());

    // 时间戳按输入流的有理帧率计算
    let nanos_per_frame = |n: u64| {
      n * 1_000_000_000 * self.info.fps_den as u64 / self.info.fps_num as u64
    };
    let pts = nanos_per_frame(self.frame_count);
    let duration = nanos_per_frame(self.frame_count + 1) - pts;

    {
      let buffer_ref = buffer.get_mut().ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;
    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
        format!("{} ({:?})", err.error(), err.debug()),
      )),
      Some(_) => Ok(()),
      None => Err(GStreamerVideoOutputError::PipelineError(
        "Timed out waiting for end of stream".to_string(),
      )),
    }
  }

  fn stop(&self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
  }
}

impl FrameSink for GStreamerVideoOutput {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    if self.closed {
      return Err(OutputError::Closed);
    }
    OutputError::check_frame_size(&self.info, frame)?;
    Ok(self.push_frame(frame.as_raw())?)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    let result = self
      .appsrc
      .end_of_stream()
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("{:?}", e)))
      .and_then(|_| self.wait_for_eos());
    self.stop();
    result?;

    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    Ok(())
  }

  fn discard(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.stop();
    if self.path.exists()
      && let Err(e) = std::fs::remove_file(&self.path)
    {
      warn!("Failed to remove partial video {}: {}", self.path.display(), e);
    }
    warn!("Video output discarded: {}", self.path.display());
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      error!("Failed to finalize video output: {}", e);
    }
  }
}
