// 该文件是 Extinguisher 项目的一部分。
// src/bin/detect_image.rs - 图片火情检测
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use extinguisher::{model::Thresholds, model::YoloDetector, task::ImageTask};

/// 检测图片中的火焰与烟雾，输出标注图像和说明
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:///models/best.onnx?size=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，image:///path/to/photo.jpg 或 https://...
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 标注图像保存路径，例如 image:///tmp/annotated.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// 重叠 (IoU) 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub overlap: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  if let Some(output) = &args.output {
    info!("输出路径: {}", output);
  }

  let thresholds = Thresholds::new(args.confidence, args.overlap)?;
  let detector = YoloDetector::cached(&args.model)?;
  let task = ImageTask::new(detector).with_thresholds(thresholds);

  let report = task.run(&args.input, args.output.as_ref())?;
  println!("{}", report.caption);

  Ok(())
}
