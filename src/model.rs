// 该文件是 Extinguisher 项目的一部分。
// src/model.rs - 检测模型与检测结果定义
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

use std::{borrow::Cow, path::Path};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

pub mod cache;
pub use self::cache::ModelCache;

#[cfg(feature = "backend-tract")]
mod yolo;
#[cfg(feature = "backend-tract")]
pub use self::yolo::{YoloDetector, YoloDetectorBuilder, YoloError, YoloParams};

/// 检测器能力：给定一张图像，返回已按阈值过滤的检测结果
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 当前模型的类别表，在模型生命周期内保持不变
  fn class_names(&self) -> &ClassNames;

  fn detect(&self, image: &RgbImage, thresholds: Thresholds) -> Result<DetectResult, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for std::sync::Arc<D> {
  type Error = D::Error;

  fn class_names(&self) -> &ClassNames {
    (**self).class_names()
  }

  fn detect(&self, image: &RgbImage, thresholds: Thresholds) -> Result<DetectResult, Self::Error> {
    (**self).detect(image, thresholds)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
  pub latency: LatencySample,
  pub thresholds: Thresholds,
}

impl DetectResult {
  pub fn new(items: Vec<DetectItem>, latency: LatencySample, thresholds: Thresholds) -> Self {
    Self {
      items: items.into_boxed_slice(),
      latency,
      thresholds,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
  #[error("confidence threshold {0} is outside [0, 1]")]
  Confidence(f32),
  #[error("overlap threshold {0} is outside [0, 1]")]
  Overlap(f32),
}

/// 置信度阈值与重叠（IoU）阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  confidence: f32,
  overlap: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: 0.5,
      overlap: 0.5,
    }
  }
}

impl Thresholds {
  pub fn new(confidence: f32, overlap: f32) -> Result<Self, ThresholdError> {
    if !(0.0..=1.0).contains(&confidence) {
      return Err(ThresholdError::Confidence(confidence));
    }
    if !(0.0..=1.0).contains(&overlap) {
      return Err(ThresholdError::Overlap(overlap));
    }
    Ok(Self {
      confidence,
      overlap,
    })
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn overlap(&self) -> f32 {
    self.overlap
  }
}

/// 单次推理的分阶段耗时，单位毫秒
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySample {
  stages: Vec<(Cow<'static, str>, f64)>,
}

impl LatencySample {
  pub fn new() -> Self {
    Self::default()
  }

  /// 追加一个阶段，负数或非有限值按 0 处理
  pub fn with_stage(mut self, name: impl Into<Cow<'static, str>>, millis: f64) -> Self {
    self.push(name, millis);
    self
  }

  pub fn push(&mut self, name: impl Into<Cow<'static, str>>, millis: f64) {
    let millis = if millis.is_finite() && millis > 0.0 {
      millis
    } else {
      0.0
    };
    self.stages.push((name.into(), millis));
  }

  pub fn stages(&self) -> impl Iterator<Item = (&str, f64)> {
    self.stages.iter().map(|(name, ms)| (name.as_ref(), *ms))
  }

  pub fn total_millis(&self) -> f64 {
    self.stages.iter().map(|(_, ms)| ms).sum()
  }

  pub fn total_seconds(&self) -> f64 {
    self.total_millis() / 1000.0
  }
}

#[derive(Error, Debug)]
pub enum ClassNamesError {
  #[error("I/O error reading label file: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid label file: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("label file contains no class names")]
  Empty,
}

#[derive(Deserialize)]
struct LabelFile {
  names: Vec<String>,
}

const BUNDLED_LABELS: &str = include_str!("../labels/fire.toml");

/// 类别索引到类别名称的映射表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
  names: Box<[String]>,
}

impl ClassNames {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 内置的火灾/烟雾类别表
  pub fn bundled() -> Self {
    // 内置文件在编译期确定
    Self::from_toml_str(BUNDLED_LABELS).unwrap_or_else(|_| Self::new(["fire", "smoke"]))
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ClassNamesError> {
    let file: LabelFile = toml::from_str(content)?;
    if file.names.is_empty() {
      return Err(ClassNamesError::Empty);
    }
    Ok(Self::new(file.names))
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassNamesError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}
