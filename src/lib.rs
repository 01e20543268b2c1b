// 该文件是 Extinguisher 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod alert;
pub mod input;
pub mod model;
pub mod output;
pub mod summary;
pub mod task;

#[cfg(feature = "ffmpeg_video")]
mod ffmpeg;

use std::path::PathBuf;

use thiserror::Error;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

#[derive(Error, Debug)]
#[error("URL 路径解码失败 '{path}': {source}")]
pub struct UrlPathError {
  path: String,
  #[source]
  source: std::string::FromUtf8Error,
}

/// 取出 URL 的路径部分并还原百分号编码，如 `forest%20fire.png` 还原为 `forest fire.png`
pub fn url_file_path(url: &url::Url) -> Result<PathBuf, UrlPathError> {
  let path = url.path();
  urlencoding::decode(path)
    .map(|decoded| PathBuf::from(decoded.into_owned()))
    .map_err(|source| UrlPathError {
      path: path.to_string(),
      source,
    })
}

/// 把文件路径写成 gst-launch 语法中的带引号字符串
#[cfg(any(feature = "gstreamer_input", feature = "gstreamer_output"))]
pub(crate) fn gst_launch_quote(path: &std::path::Path) -> String {
  let escaped = path
    .display()
    .to_string()
    .replace('\\', "\\\\")
    .replace('"', "\\\"");
  format!("\"{}\"", escaped)
}

/// 视频流参数：输出流必须与输入流一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
  pub width: u32,
  pub height: u32,
  /// 帧率分子
  pub fps_num: u32,
  /// 帧率分母
  pub fps_den: u32,
}

impl StreamInfo {
  pub fn fps(&self) -> f64 {
    if self.fps_den == 0 {
      0.0
    } else {
      self.fps_num as f64 / self.fps_den as f64
    }
  }

  /// 单帧的 RGB24 字节数
  pub fn frame_size(&self) -> usize {
    self.width as usize * self.height as usize * 3
  }
}

impl std::fmt::Display for StreamInfo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}x{} @ {}/{} fps",
      self.width, self.height, self.fps_num, self.fps_den
    )
  }
}
