// 该文件是 Extinguisher 项目的一部分。
// src/model/yolo.rs - 基于 tract 的 YOLO ONNX 检测器
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

//! # YOLO 检测器
//!
//! 加载 Ultralytics 导出的 ONNX 模型（输出形状 `[1, 4 + nc, anchors]`，
//! 或转置后的 `[1, anchors, 4 + nc]`），在 CPU 上执行推理。
//!
//! ## URL 格式
//!
//! - `yolo:///path/to/best.onnx` - 输入尺寸 640，使用内置的 fire/smoke 类别表
//! - `yolo:///path/to/best.onnx?size=416&labels=/path/to/labels.toml` - 指定输入尺寸与类别表

use std::{
  path::{Path, PathBuf},
  sync::{Arc, OnceLock},
  time::Instant,
};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, url_file_path,
  model::{
    ClassNames, ClassNamesError, DetectItem, DetectResult, Detector, LatencySample, ModelCache,
    Thresholds,
  },
};

const YOLO_DEFAULT_INPUT_SIZE: usize = 640;
const YOLO_BOX_FIELDS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("类别表错误: {0}")]
  Labels(#[from] ClassNamesError),
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("ONNX 推理错误: {0}")]
  Inference(String),
  #[error("模型输出形状不支持: {0:?}")]
  OutputShape(Vec<usize>),
}

impl YoloError {
  fn load(e: TractError) -> Self {
    YoloError::ModelLoad(format!("{e:#}"))
  }

  fn inference(e: TractError) -> Self {
    YoloError::Inference(format!("{e:#}"))
  }
}

pub struct YoloDetectorBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  input_size: usize,
}

impl FromUrlWithScheme for YoloDetectorBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloDetectorBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let model_path = url_file_path(url).map_err(|e| YoloError::ModelPathError(e.to_string()))?;
    let mut builder = YoloDetectorBuilder::new(model_path);
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "size" => {
          let size = v
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0 && size % 32 == 0)
            .ok_or_else(|| YoloError::ModelPathError(format!("无效的输入尺寸: {}", v)))?;
          builder = builder.input_size(size);
        }
        "labels" => builder = builder.labels(v.as_ref()),
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }
    Ok(builder)
  }
}

impl YoloDetectorBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels_path: None,
      input_size: YOLO_DEFAULT_INPUT_SIZE,
    }
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn input_size(mut self, size: usize) -> Self {
    self.input_size = size;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn params(&self) -> YoloParams {
    YoloParams {
      input_size: self.input_size,
      labels_path: self.labels_path.clone(),
    }
  }

  pub fn build(self) -> Result<YoloDetector, YoloError> {
    let class_names = match &self.labels_path {
      Some(path) => ClassNames::load(path)?,
      None => ClassNames::bundled(),
    };
    debug!("类别表: {:?}", class_names.iter().collect::<Vec<_>>());

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(YoloError::load)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(YoloError::load)?
      .into_optimized()
      .map_err(YoloError::load)?
      .into_runnable()
      .map_err(YoloError::load)?;
    info!("模型加载完成，输入尺寸 {}x{}", size, size);

    Ok(YoloDetector {
      plan,
      class_names,
      params: self.params(),
    })
  }
}

/// 影响推理结果的加载参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoloParams {
  pub input_size: usize,
  pub labels_path: Option<PathBuf>,
}

impl YoloParams {
  /// 列出 `requested` 中与当前参数不同的项
  pub fn differences(&self, requested: &YoloParams) -> Vec<String> {
    let mut differences = Vec::new();
    if self.input_size != requested.input_size {
      differences.push(format!(
        "size={} (已加载 {})",
        requested.input_size, self.input_size
      ));
    }
    if self.labels_path != requested.labels_path {
      let show = |path: &Option<PathBuf>| {
        path
          .as_ref()
          .map_or_else(|| "内置类别表".to_string(), |p| p.display().to_string())
      };
      differences.push(format!(
        "labels={} (已加载 {})",
        show(&requested.labels_path),
        show(&self.labels_path)
      ));
    }
    differences
  }
}

pub struct YoloDetector {
  plan: TypedRunnableModel<TypedModel>,
  class_names: ClassNames,
  params: YoloParams,
}

static YOLO_CACHE: OnceLock<ModelCache<YoloDetector>> = OnceLock::new();

impl YoloDetector {
  /// 通过进程级缓存加载模型，同一模型路径只加载一次
  ///
  /// 缓存以模型路径为键。之后以不同的 `size` 或 `labels` 请求同一路径时
  /// 仍返回首次加载的实例，并记录警告。
  pub fn cached(url: &Url) -> Result<Arc<YoloDetector>, YoloError> {
    let builder = YoloDetectorBuilder::from_url(url)?;
    let path = builder.model_path().to_path_buf();
    let requested = builder.params();
    let detector = YOLO_CACHE
      .get_or_init(ModelCache::new)
      .get_or_load(&path, |_| builder.build())?;
    for difference in detector.params.differences(&requested) {
      warn!(
        "模型 {} 已按不同参数加载，忽略本次请求的 {}",
        path.display(),
        difference
      );
    }
    Ok(detector)
  }

  pub fn params(&self) -> &YoloParams {
    &self.params
  }

  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let size = self.params.input_size as u32;
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let input = tract_ndarray::Array4::from_shape_fn(
      (1, 3, self.params.input_size, self.params.input_size),
      |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    );
    input.into_tensor()
  }

  fn postprocess(
    &self,
    outputs: TVec<TValue>,
    thresholds: Thresholds,
  ) -> Result<Vec<DetectItem>, YoloError> {
    let output = outputs
      .first()
      .ok_or_else(|| YoloError::Inference("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(YoloError::inference)?;
    let shape = view.shape().to_vec();
    let view = view
      .into_dimensionality::<tract_ndarray::Ix3>()
      .map_err(|_| YoloError::OutputShape(shape.clone()))?;

    let candidates = decode_candidates(
      &view,
      self.params.input_size as f32,
      thresholds.confidence(),
    )
    .ok_or(YoloError::OutputShape(shape))?;
    Ok(non_max_suppression(candidates, thresholds.overlap()))
  }
}

impl Detector for YoloDetector {
  type Error = YoloError;

  fn class_names(&self) -> &ClassNames {
    &self.class_names
  }

  fn detect(&self, image: &RgbImage, thresholds: Thresholds) -> Result<DetectResult, YoloError> {
    let mut latency = LatencySample::new();

    let now = Instant::now();
    let input = self.preprocess(image);
    latency.push("preprocess", now.elapsed().as_secs_f64() * 1000.0);

    let now = Instant::now();
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(YoloError::inference)?;
    latency.push("inference", now.elapsed().as_secs_f64() * 1000.0);

    let now = Instant::now();
    let items = self.postprocess(outputs, thresholds)?;
    latency.push("postprocess", now.elapsed().as_secs_f64() * 1000.0);

    debug!(
      "检测到 {} 个目标，耗时 {:.1} ms",
      items.len(),
      latency.total_millis()
    );
    Ok(DetectResult::new(items, latency, thresholds))
  }
}

/// 将原始输出解码为候选框
///
/// 每个 anchor 取得分最高的类别，低于置信度阈值的丢弃；坐标换算为归一化坐标。
/// 输出形状无法识别时返回 `None`。
fn decode_candidates(
  output: &tract_ndarray::ArrayView3<f32>,
  input_size: f32,
  confidence: f32,
) -> Option<Vec<DetectItem>> {
  let (_, rows, cols) = output.dim();
  // [1, 4 + nc, anchors] 或 [1, anchors, 4 + nc]，anchor 数总是多于通道数
  let transposed = rows > cols;
  let (fields, anchors) = if transposed { (cols, rows) } else { (rows, cols) };
  if fields <= YOLO_BOX_FIELDS {
    return None;
  }
  let value = |field: usize, anchor: usize| {
    if transposed {
      output[[0, anchor, field]]
    } else {
      output[[0, field, anchor]]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (YOLO_BOX_FIELDS..fields)
      .map(|field| (field - YOLO_BOX_FIELDS, value(field, anchor)))
      .fold((0, f32::NEG_INFINITY), |best, current| {
        if current.1 > best.1 { current } else { best }
      });
    if !score.is_finite() || score < confidence {
      continue;
    }

    let cx = value(0, anchor) / input_size;
    let cy = value(1, anchor) / input_size;
    let w = value(2, anchor) / input_size;
    let h = value(3, anchor) / input_size;
    candidates.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: [
        (cx - w / 2.0).clamp(0.0, 1.0),
        (cy - h / 2.0).clamp(0.0, 1.0),
        (cx + w / 2.0).clamp(0.0, 1.0),
        (cy + h / 2.0).clamp(0.0, 1.0),
      ],
    });
  }
  Some(candidates)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x_min = a[0].max(b[0]);
  let y_min = a[1].max(b[1]);
  let x_max = a[2].min(b[2]);
  let y_max = a[3].min(b[3]);
  let intersection = (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;
  if union <= 0.0 { 0.0 } else { intersection / union }
}

/// 按类别的贪心 NMS，结果按得分降序
fn non_max_suppression(mut candidates: Vec<DetectItem>, overlap: f32) -> Vec<DetectItem> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut kept: Vec<DetectItem> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > overlap);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn params_report_differences_from_cached_instance() {
    let loaded = YoloDetectorBuilder::new("/models/fire.onnx").params();
    let same = YoloDetectorBuilder::new("/models/fire.onnx").params();
    assert!(loaded.differences(&same).is_empty());

    let url =
      Url::parse("yolo:///models/fire.onnx?size=416&labels=/models/wildfire.toml").unwrap();
    let requested = YoloDetectorBuilder::from_url(&url).unwrap().params();
    let differences = loaded.differences(&requested);
    assert_eq!(differences.len(), 2);
    assert!(differences[0].starts_with("size=416"));
    assert!(differences[1].contains("/models/wildfire.toml"));
  }

  #[test]
  fn model_url_path_is_decoded() {
    let url = Url::parse("yolo:///models/forest%20fire/best.onnx").unwrap();
    let builder = YoloDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.model_path(),
      Path::new("/models/forest fire/best.onnx")
    );
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = [0.0, 0.0, 0.5, 0.5];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[0.6, 0.6, 0.9, 0.9]), 0.0);
  }

  #[test]
  fn nms_suppresses_overlapping_boxes_of_same_class() {
    let kept = non_max_suppression(
      vec![
        item(0, 0.6, [0.10, 0.10, 0.50, 0.50]),
        item(0, 0.9, [0.11, 0.11, 0.51, 0.51]),
        item(1, 0.7, [0.10, 0.10, 0.50, 0.50]),
        item(0, 0.8, [0.60, 0.60, 0.90, 0.90]),
      ],
      0.5,
    );
    let scores: Vec<f32> = kept.iter().map(|k| k.score).collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.7]);
  }

  #[test]
  fn decodes_channel_major_output() {
    // 2 个类别，8 个 anchor：[1, 6, 8]
    let mut output = tract_ndarray::Array3::<f32>::zeros((1, 6, 8));
    // anchor 0: smoke 0.8，中心 (320, 320)，尺寸 64x128
    output[[0, 0, 0]] = 320.0;
    output[[0, 1, 0]] = 320.0;
    output[[0, 2, 0]] = 64.0;
    output[[0, 3, 0]] = 128.0;
    output[[0, 4, 0]] = 0.1;
    output[[0, 5, 0]] = 0.8;
    // anchor 1: 得分过低
    output[[0, 4, 1]] = 0.3;

    let candidates = decode_candidates(&output.view(), 640.0, 0.5).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 1);
    assert_eq!(candidates[0].score, 0.8);
    let expected = [0.45, 0.4, 0.55, 0.6];
    for (got, want) in candidates[0].bbox.iter().zip(expected) {
      assert!((got - want).abs() < 1e-6, "{got} != {want}");
    }
  }

  #[test]
  fn decodes_anchor_major_output() {
    // [1, 8, 5]：8 个 anchor，1 个类别
    let mut output = tract_ndarray::Array3::<f32>::zeros((1, 8, 5));
    output[[0, 2, 0]] = 64.0;
    output[[0, 2, 1]] = 64.0;
    output[[0, 2, 2]] = 32.0;
    output[[0, 2, 3]] = 32.0;
    output[[0, 2, 4]] = 0.95;

    let candidates = decode_candidates(&output.view(), 128.0, 0.5).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 0);
    assert_eq!(candidates[0].bbox, [0.375, 0.375, 0.625, 0.625]);
  }

  #[test]
  fn rejects_output_without_class_scores() {
    let output = tract_ndarray::Array3::<f32>::zeros((1, 4, 10));
    assert!(decode_candidates(&output.view(), 640.0, 0.5).is_none());
  }

  #[test]
  fn builder_reads_url_parameters() {
    let url = Url::parse("yolo:///models/best.onnx?size=416&labels=/models/labels.toml").unwrap();
    let builder = YoloDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path(), Path::new("/models/best.onnx"));
    assert_eq!(builder.input_size, 416);
    assert_eq!(
      builder.labels_path.as_deref(),
      Some(Path::new("/models/labels.toml"))
    );

    let bad = Url::parse("yolo:///models/best.onnx?size=100").unwrap();
    assert!(YoloDetectorBuilder::from_url(&bad).is_err());
    let wrong_scheme = Url::parse("image:///models/best.onnx").unwrap();
    assert!(YoloDetectorBuilder::from_url(&wrong_scheme).is_err());
  }
}
