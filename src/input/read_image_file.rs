// 该文件是 Extinguisher 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use crate::{FromUrl, StreamInfo, UrlPathError, input::FrameSource, url_file_path};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::InputError;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid path: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Image has no pixels")]
  EmptyImage,
  #[error("Error loading image from URL: {0}")]
  FetchError(String),
  #[error("Fetching images over HTTP requires the `fetch_image_url` feature")]
  FetchDisabled,
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 单张图像输入
///
/// `image:///path/to/photo.jpg` 读取本地文件；`http(s)://` 地址在启用
/// `fetch_image_url` 特性时直接下载。作为帧来源时只产生一帧。
#[derive(Debug)]
pub struct ImageFileInput {
  image: Option<RgbImage>,
  info: StreamInfo,
}

impl ImageFileInput {
  pub fn accepts(url: &Url) -> bool {
    matches!(url.scheme(), READ_IMAGE_FILE_SCHEME | "http" | "https")
  }

  pub fn from_image(image: RgbImage) -> Result<Self, ImageFileInputError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ImageFileInputError::EmptyImage);
    }
    Ok(ImageFileInput {
      image: Some(image),
      info: StreamInfo {
        width,
        height,
        fps_num: 1,
        fps_den: 1,
      },
    })
  }

  /// 取出图像，之后不再产生帧
  pub fn take_image(&mut self) -> Option<RgbImage> {
    self.image.take()
  }
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let image = match url.scheme() {
      READ_IMAGE_FILE_SCHEME => {
        let path = url_file_path(url)?;
        info!("读取图像文件: {}", path.display());
        ImageReader::open(&path)?.with_guessed_format()?.decode()?
      }
      "http" | "https" => fetch_image(url)?,
      other => {
        error!(
          "URI scheme mismatch: expected '{}', found '{}'",
          READ_IMAGE_FILE_SCHEME, other
        );
        return Err(ImageFileInputError::SchemaMismatch);
      }
    };

    Self::from_image(image.into_rgb8())
  }
}

impl FrameSource for ImageFileInput {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    Ok(self.image.take())
  }
}

// 下载的图像大小上限
#[cfg(feature = "fetch_image_url")]
const MAX_FETCH_BYTES: u64 = 64 * 1024 * 1024;

#[cfg(feature = "fetch_image_url")]
fn fetch_image(url: &Url) -> Result<image::DynamicImage, ImageFileInputError> {
  use std::io::Read;

  info!("下载图像: {}", url);
  let response = ureq::get(url.as_str())
    .call()
    .map_err(|e| ImageFileInputError::FetchError(e.to_string()))?;

  let mut bytes = Vec::new();
  response
    .into_reader()
    .take(MAX_FETCH_BYTES)
    .read_to_end(&mut bytes)?;

  Ok(image::load_from_memory(&bytes)?)
}

#[cfg(not(feature = "fetch_image_url"))]
fn fetch_image(url: &Url) -> Result<image::DynamicImage, ImageFileInputError> {
  error!("无法下载图像 {}: 未启用 fetch_image_url 特性", url);
  Err(ImageFileInputError::FetchDisabled)
}
