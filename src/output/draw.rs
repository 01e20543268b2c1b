// 该文件是 Extinguisher 项目的一部分。
// src/output/draw.rs - 检测框与标签绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::model::DetectItem;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HORIZONTAL_PADDING: u32 = 4;
const LABEL_TEXT_VERTICAL_PADDING: u32 = 2;
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 检测结果绘制工具
pub struct Draw {
  font: FontArc,
  font_scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");
    Self::with_font(font)
  }
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    // 从红色开始的色环，类别 0 (fire) 为红色
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 * 137.5) % 360.0, 0.85, 0.95))
      .collect();

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
    }
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 在图像上绘制一个检测框及其标签
  pub fn draw_item(&self, image: &mut RgbImage, item: &DetectItem, name: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = self.color_of(item.class_id);

    let x_min = ((item.bbox[0] * w as f32).floor() as i32).clamp(0, w - 1);
    let y_min = ((item.bbox[1] * h as f32).floor() as i32).clamp(0, h - 1);
    let x_max = ((item.bbox[2] * w as f32).ceil() as i32).clamp(0, w - 1);
    let y_max = ((item.bbox[3] * h as f32).ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for thickness in 0..BOX_THICKNESS {
      let x_min_t = (x_min + thickness).min(x_max);
      let y_min_t = (y_min + thickness).min(y_max);
      let x_max_t = (x_max - thickness).max(x_min_t);
      let y_max_t = (y_max - thickness).max(y_min_t);

      for x in x_min_t..=x_max_t {
        image.put_pixel(x as u32, y_min_t as u32, color);
        image.put_pixel(x as u32, y_max_t as u32, color);
      }
      for y in y_min_t..=y_max_t {
        image.put_pixel(x_min_t as u32, y as u32, color);
        image.put_pixel(x_max_t as u32, y as u32, color);
      }
    }

    let label = format!("{} {:.2}", name, item.score);
    let (text_width, text_height) = text_size(self.font_scale, &self.font, &label);
    let label_width = (text_width + 2 * LABEL_TEXT_HORIZONTAL_PADDING).min((w - x_min) as u32);
    let label_height = text_height + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框的上方，空间不足时放在框内顶部
    let label_y = if y_min >= label_height as i32 {
      y_min - label_height as i32
    } else {
      y_min
    };

    if label_width > 0 {
      let rect = Rect::at(x_min, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        x_min + LABEL_TEXT_HORIZONTAL_PADDING as i32,
        label_y + LABEL_TEXT_VERTICAL_PADDING as i32,
        self.font_scale,
        &self.font,
        &label,
      );
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}
