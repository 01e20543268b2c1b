// 该文件是 Extinguisher 项目的一部分。
// src/summary.rs - 检测结果汇总：标注图像与文字说明
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

//! # 检测结果汇总
//!
//! 把一帧的检测结果转换为标注后的图像和一句说明，例如
//! `Predicted 5 fires, 2 smokes in 0.05 seconds.`。
//! 图片与视频两条路径共用这里的实现。

use image::RgbImage;
use thiserror::Error;

use crate::{
  model::{ClassNames, DetectResult, LatencySample},
  output::draw::Draw,
};

pub const NO_OBJECTS_CAPTION: &str = "No objects detected";
const CAPTION_PREFIX: &str = "Predicted ";
const CAPTION_SEPARATOR: &str = ", ";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SummarizeError {
  #[error("invalid frame: {width}x{height} has no pixels")]
  InvalidFrame { width: u32, height: u32 },
  #[error("unknown class id {class_id}: the detector's class table has {known} entries")]
  UnknownClass { class_id: u32, known: usize },
}

/// 一帧内各类别的计数，保留首次出现的顺序
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassCount<'a> {
  counts: Vec<(&'a str, usize)>,
}

impl<'a> ClassCount<'a> {
  pub fn from_result(
    result: &DetectResult,
    class_names: &'a ClassNames,
  ) -> Result<Self, SummarizeError> {
    let mut count = ClassCount::default();
    for item in result.items.iter() {
      let name = class_names
        .get(item.class_id)
        .ok_or(SummarizeError::UnknownClass {
          class_id: item.class_id,
          known: class_names.len(),
        })?;
      count.increment(name);
    }
    Ok(count)
  }

  pub fn increment(&mut self, name: &'a str) {
    match self.counts.iter_mut().find(|(n, _)| *n == name) {
      Some((_, c)) => *c += 1,
      None => self.counts.push((name, 1)),
    }
  }

  pub fn get(&self, name: &str) -> usize {
    self
      .counts
      .iter()
      .find(|(n, _)| *n == name)
      .map_or(0, |(_, c)| *c)
  }

  pub fn is_empty(&self) -> bool {
    self.counts.is_empty()
  }

  /// 按计数降序排列；计数相同的保持首次出现的顺序
  pub fn descending(&self) -> Vec<(&'a str, usize)> {
    let mut sorted = self.counts.clone();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
  }
}

/// 一帧检测结果的文字说明
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caption(String);

impl Caption {
  pub fn compose(count: &ClassCount, latency: &LatencySample, latency_on_empty: bool) -> Self {
    let mut text = if count.is_empty() {
      NO_OBJECTS_CAPTION.to_string()
    } else {
      let entries = count
        .descending()
        .into_iter()
        .map(|(name, n)| {
          if n > 1 {
            format!("{} {}s", n, name)
          } else {
            format!("{} {}", n, name)
          }
        })
        .collect::<Vec<_>>()
        .join(CAPTION_SEPARATOR);
      format!("{}{}", CAPTION_PREFIX, entries)
    };

    if !count.is_empty() || latency_on_empty {
      text.push_str(&format!(" in {:.2} seconds.", latency.total_seconds()));
    }
    Caption(text)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn into_string(self) -> String {
    self.0
  }
}

impl std::fmt::Display for Caption {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for Caption {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// 汇总结果：标注后的图像与说明
#[derive(Debug, Clone)]
pub struct Summary {
  pub image: RgbImage,
  pub caption: Caption,
}

pub struct Summarizer {
  draw: Draw,
  latency_on_empty: bool,
}

impl Default for Summarizer {
  fn default() -> Self {
    Self::new(Draw::default())
  }
}

impl Summarizer {
  pub fn new(draw: Draw) -> Self {
    Self {
      draw,
      latency_on_empty: false,
    }
  }

  /// 没有检测到目标时是否也附带耗时，默认不附带
  pub fn with_latency_on_empty(mut self, enabled: bool) -> Self {
    self.latency_on_empty = enabled;
    self
  }

  /// 仅生成说明，不绘制图像
  pub fn caption(
    &self,
    result: &DetectResult,
    class_names: &ClassNames,
  ) -> Result<Caption, SummarizeError> {
    let count = ClassCount::from_result(result, class_names)?;
    Ok(Caption::compose(&count, &result.latency, self.latency_on_empty))
  }

  /// 汇总一帧：在帧的副本上绘制检测框并生成说明，原始帧保持不变
  pub fn summarize(
    &self,
    frame: &RgbImage,
    result: &DetectResult,
    class_names: &ClassNames,
  ) -> Result<Summary, SummarizeError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      return Err(SummarizeError::InvalidFrame { width, height });
    }

    let caption = self.caption(result, class_names)?;

    let mut image = frame.clone();
    for item in result.items.iter() {
      // 类别已在生成说明时校验
      if let Some(name) = class_names.get(item.class_id) {
        self.draw.draw_item(&mut image, item, name);
      }
    }

    Ok(Summary { image, caption })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, Thresholds};
  use image::Rgb;

  fn names() -> ClassNames {
    ClassNames::new(["fire", "smoke"])
  }

  fn latency_ms(ms: f64) -> LatencySample {
    LatencySample::new()
      .with_stage("preprocess", ms * 0.25)
      .with_stage("inference", ms * 0.5)
      .with_stage("postprocess", ms * 0.25)
  }

  fn item(class_id: u32) -> DetectItem {
    DetectItem {
      class_id,
      score: 0.87,
      bbox: [0.25, 0.25, 0.75, 0.75],
    }
  }

  fn result(class_ids: &[u32], latency: LatencySample) -> DetectResult {
    DetectResult::new(
      class_ids.iter().copied().map(item).collect(),
      latency,
      Thresholds::default(),
    )
  }

  fn frame() -> RgbImage {
    RgbImage::from_pixel(64, 48, Rgb([10, 120, 30]))
  }

  #[test]
  fn empty_detections_have_no_latency_suffix() {
    let summarizer = Summarizer::default();
    let caption = summarizer
      .caption(&result(&[], latency_ms(48.0)), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "No objects detected");
  }

  #[test]
  fn latency_on_empty_can_be_enabled() {
    let summarizer = Summarizer::default().with_latency_on_empty(true);
    let caption = summarizer
      .caption(&result(&[], latency_ms(48.0)), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "No objects detected in 0.05 seconds.");
  }

  #[test]
  fn single_detection_is_singular() {
    let caption = Summarizer::default()
      .caption(&result(&[0], latency_ms(48.0)), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "Predicted 1 fire in 0.05 seconds.");
  }

  #[test]
  fn repeated_detections_are_pluralized() {
    let caption = Summarizer::default()
      .caption(&result(&[0, 0, 0], latency_ms(1234.0)), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "Predicted 3 fires in 1.23 seconds.");
  }

  #[test]
  fn classes_are_reported_by_descending_count() {
    let caption = Summarizer::default()
      .caption(&result(&[1, 0, 1, 0, 0, 0, 0], latency_ms(48.0)), &names())
      .unwrap();
    assert_eq!(
      caption.as_str(),
      "Predicted 5 fires, 2 smokes in 0.05 seconds."
    );
  }

  #[test]
  fn ties_keep_first_encountered_order() {
    let caption = Summarizer::default()
      .caption(&result(&[1, 0, 0, 1], latency_ms(8.0)), &names())
      .unwrap();
    assert_eq!(
      caption.as_str(),
      "Predicted 2 smokes, 2 fires in 0.01 seconds."
    );
  }

  #[test]
  fn latency_is_rounded_to_two_decimals() {
    let latency = LatencySample::new()
      .with_stage("preprocess", 1.5)
      .with_stage("inference", 23.4)
      .with_stage("postprocess", 2.1);
    let caption = Summarizer::default()
      .caption(&result(&[1], latency), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "Predicted 1 smoke in 0.03 seconds.");

    let caption = Summarizer::default()
      .caption(&result(&[1], LatencySample::new()), &names())
      .unwrap();
    assert_eq!(caption.as_str(), "Predicted 1 smoke in 0.00 seconds.");
  }

  #[test]
  fn latency_ties_round_like_the_binary_value() {
    // 恰好落在 .xx5 上的值按偶数舍入，其余按二进制近似值舍入
    for (millis, seconds) in [
      (125.0, "0.12"),
      (375.0, "0.38"),
      (2675.0, "2.67"),
      (1005.0, "1.00"),
      (15.0, "0.01"),
    ] {
      let caption = Summarizer::default()
        .caption(&result(&[0], latency_ms(millis)), &names())
        .unwrap();
      assert_eq!(
        caption.as_str(),
        format!("Predicted 1 fire in {} seconds.", seconds),
        "{} ms",
        millis
      );
    }
  }

  #[test]
  fn unknown_class_fails_whole_call() {
    let err = Summarizer::default()
      .summarize(&frame(), &result(&[0, 7], latency_ms(48.0)), &names())
      .unwrap_err();
    assert_eq!(
      err,
      SummarizeError::UnknownClass {
        class_id: 7,
        known: 2
      }
    );
  }

  #[test]
  fn empty_frame_is_invalid() {
    let err = Summarizer::default()
      .summarize(&RgbImage::new(0, 10), &result(&[0], latency_ms(48.0)), &names())
      .unwrap_err();
    assert_eq!(
      err,
      SummarizeError::InvalidFrame {
        width: 0,
        height: 10
      }
    );
  }

  #[test]
  fn summarize_draws_on_a_copy() {
    let original = frame();
    let input = original.clone();
    let summary = Summarizer::default()
      .summarize(&input, &result(&[0], latency_ms(48.0)), &names())
      .unwrap();

    assert_eq!(input, original);
    assert_eq!(summary.image.dimensions(), original.dimensions());
    assert_ne!(summary.image, original);
  }

  #[test]
  fn no_detections_leave_frame_unchanged() {
    let original = frame();
    let summary = Summarizer::default()
      .summarize(&original, &result(&[], latency_ms(48.0)), &names())
      .unwrap();
    assert_eq!(summary.image, original);
    assert_eq!(summary.caption.as_str(), NO_OBJECTS_CAPTION);
  }

  #[test]
  fn summarize_is_deterministic() {
    let summarizer = Summarizer::default();
    let input = frame();
    let detections = result(&[0, 1, 0], latency_ms(120.0));
    let first = summarizer.summarize(&input, &detections, &names()).unwrap();
    let second = summarizer.summarize(&input, &detections, &names()).unwrap();
    assert_eq!(first.caption, second.caption);
    assert_eq!(first.image, second.image);
  }

  #[test]
  fn class_count_tracks_occurrences() {
    let names = names();
    let detections = result(&[1, 0, 1], latency_ms(1.0));
    let count = ClassCount::from_result(&detections, &names).unwrap();
    assert_eq!(count.get("smoke"), 2);
    assert_eq!(count.get("fire"), 1);
    assert_eq!(count.get("ash"), 0);
    assert_eq!(count.descending(), vec![("smoke", 2), ("fire", 1)]);
  }
}
