// 该文件是 Extinguisher 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
  io::Cursor,
  path::{Path, PathBuf},
};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, UrlPathError, url_file_path};

pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("路径无效: {0}")]
  InvalidPath(#[from] UrlPathError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: url_file_path(uri)?,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 保存图像，格式由扩展名决定，没有扩展名时保存为 PNG
  pub fn save(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    let path = self.path();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    match ImageFormat::from_path(path) {
      Ok(format) => image.save_with_format(path, format)?,
      Err(_) => image.save_with_format(path, ImageFormat::Png)?,
    }

    info!("保存图像到文件: {}", path.display());
    Ok(())
  }
}

/// 将图像编码为 PNG 字节，用于下载
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Png)?;
  Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn saves_into_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results").join("annotated.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let output = SaveImageFileOutput::from_url(&url).unwrap();
    output
      .save(&RgbImage::from_pixel(5, 5, Rgb([1, 2, 3])))
      .unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(*saved.get_pixel(2, 2), Rgb([1, 2, 3]));
  }

  #[test]
  fn saves_to_path_with_space() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forest fire.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();

    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path.as_path());
    output.save(&RgbImage::new(2, 2)).unwrap();
    assert!(path.exists());
  }

  #[test]
  fn encodes_png_signature() {
    let bytes = encode_png(&RgbImage::new(3, 2)).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
  }
}
