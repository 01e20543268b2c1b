// 该文件是 Extinguisher 项目的一部分。
// src/bin/detect_video.rs - 视频火情检测与转码
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
use tracing::{info, warn};
use url::Url;

use extinguisher::{
  model::{Thresholds, YoloDetector},
  task::{CancelToken, StreamEnd, Transcoder, UrlMediaOpener},
};

/// 逐帧检测视频中的火焰与烟雾，输出标注后的视频
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:///models/best.onnx?size=640
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入视频，例如 video:///path/to/input.mp4 或 folder:///path/to/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出视频，例如 video:///path/to/output.mp4
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// 重叠 (IoU) 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub overlap: f32,
  /// 解码中途失败时报错，而不是保留已处理的帧
  #[arg(long)]
  pub strict_decode: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let thresholds = Thresholds::new(args.confidence, args.overlap)?;
  let detector = YoloDetector::cached(&args.model)?;

  let cancel = CancelToken::new();
  cancel.cancel_on_ctrlc()?;

  let transcoder = Transcoder::new(detector)
    .with_thresholds(thresholds)
    .with_lenient_decode_stop(!args.strict_decode)
    .with_cancel_token(cancel);

  let report = transcoder.transcode(&UrlMediaOpener, &args.input, &args.output)?;
  match report.ending {
    StreamEnd::Exhausted => info!("处理完成，共 {} 帧", report.frames_written),
    StreamEnd::DecodeStopped => warn!("输入解码中断，已保存 {} 帧", report.frames_written),
    StreamEnd::Cancelled => warn!("任务被中断，已保存 {} 帧", report.frames_written),
  }

  Ok(())
}
