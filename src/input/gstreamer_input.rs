// 该文件是 Extinguisher 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 使用 GStreamer 解码视频文件，帧尺寸与帧率在预滚动 (preroll) 阶段
//! 从 caps 中读取。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL 格式
//!
//! `gst://file/path/to/video.mp4?rotate=90`
//!
//! - `rotate`: 旋转角度（0/90/180/270），可选

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, StreamInfo, UrlPathError, gst_launch_quote, input::FrameSource,
  url_file_path,
};

use super::InputError;

// 预滚动等待上限（秒）
const PREROLL_TIMEOUT_SECS: u64 = 30;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://file/..."）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Invalid path: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn video_flip(rotate: Option<&str>) -> Option<String> {
  let (method, direction) = match rotate? {
    "90" => (1, 1),
    "180" => (2, 2),
    "270" => (3, 3),
    _ => return None,
  };
  Some(format!(
    "videoflip method={} video-direction={}",
    method, direction
  ))
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，按顺序提供解码后的 RGB 帧。
/// 被 drop 时管道切换到 Null 状态。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: StreamInfo,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("file") {
      error!("URI scheme mismatch: expected 'gst://file/...', found '{}'", url);
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = url_file_path(url)?;
    let mut items = vec![format!(
      "filesrc location={} ! decodebin",
      gst_launch_quote(&path)
    )];
    if let Some(flip) = video_flip(query.get("rotate").map(|s| s.as_ref())) {
      items.push(flip);
    }
    items.push("videoconvert ! video/x-raw,format=RGB".to_string());

    Self::launch(&items.join(" ! "))
  }
}

impl GStreamerInput {
  fn launch(basic_pipeline: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    // 转码需要每一帧，appsink 不丢帧
    let full_pipeline = format!(
      "{} ! appsink name=sink sync=false max-buffers=4 drop=false",
      basic_pipeline
    );
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      info: StreamInfo {
        width: 0,
        height: 0,
        fps_num: 0,
        fps_den: 1,
      },
    };
    input.preroll()?;
    input.pipeline.set_state(gst::State::Playing)?;
    Ok(input)
  }

  fn preroll(&mut self) -> Result<(), GStreamerInputError> {
    self.pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = self
      .pipeline
      .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if let Err(e) = result {
      return Err(self.bus_error().unwrap_or(GStreamerInputError::StateChangeError(e)));
    }

    let sample = self
      .appsink
      .pull_preroll()
      .map_err(|_| self.bus_error().unwrap_or(GStreamerInputError::VideoInfoError))?;
    let caps = sample.caps().ok_or(GStreamerInputError::VideoInfoError)?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = video_info.fps();
    let (fps_num, fps_den) = if fps.numer() > 0 && fps.denom() > 0 {
      (fps.numer() as u32, fps.denom() as u32)
    } else {
      warn!("视频流没有有效帧率，按 25 fps 处理");
      (25, 1)
    };

    self.info = StreamInfo {
      width: video_info.width(),
      height: video_info.height(),
      fps_num,
      fps_den,
    };
    info!("GStreamer 视频流信息: {}", self.info);
    Ok(())
  }

  fn bus_error(&self) -> Option<GStreamerInputError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(GStreamerInputError::PipelineError(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      ))),
      _ => None,
    }
  }

  fn pull_frame(&mut self) -> Result<Option<RgbImage>, GStreamerInputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => convert_sample(&sample).map(Some),
      Err(_) if self.appsink.is_eos() => {
        info!("GStreamer 输入结束");
        Ok(None)
      }
      Err(e) => Err(
        self
          .bus_error()
          .unwrap_or_else(|| GStreamerInputError::PipelineError(format!("Failed to pull sample: {}", e))),
      ),
    }
  }
}

impl FrameSource for GStreamerInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(self.pull_frame()?)
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row = width * 3;
  let expected = stride * (height.saturating_sub(1)) + row;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 按 stride 拷贝，去掉行尾对齐填充
  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row * height,
      actual: data.len(),
    },
  )
}
