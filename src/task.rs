// 该文件是 Extinguisher 项目的一部分。
// src/task.rs - 图片检测任务与视频转码任务
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
  error::Error as StdError,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, StreamInfo,
  input::{FrameSource, ImageFileInput, ImageFileInputError, InputError, InputWrapper},
  model::{DetectResult, Detector, Thresholds},
  output::{FrameSink, OutputError, OutputWrapper, SaveImageFileError, SaveImageFileOutput},
  summary::{Caption, SummarizeError, Summarizer},
};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 协作式取消标志，转码循环每帧检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 收到 Ctrl-C 时设置取消标志；再次收到时直接退出进程
  pub fn cancel_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      if token.is_cancelled() {
        warn!("再次收到中断信号，强制退出程序");
        std::process::exit(130);
      }
      info!("收到中断信号，处理完当前帧后退出...");
      token.cancel();
    })
  }
}

/// 按 URL 打开输入流、创建输出流
pub trait MediaOpener {
  type Source: FrameSource;
  type Sink: FrameSink;

  fn open_source(&self, url: &Url) -> Result<Self::Source, InputError>;

  fn create_sink(&self, url: &Url, info: &StreamInfo) -> Result<Self::Sink, OutputError>;
}

/// 按 scheme 选择输入输出实现
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlMediaOpener;

impl MediaOpener for UrlMediaOpener {
  type Source = InputWrapper;
  type Sink = OutputWrapper;

  fn open_source(&self, url: &Url) -> Result<Self::Source, InputError> {
    InputWrapper::from_url(url)
  }

  fn create_sink(&self, url: &Url, info: &StreamInfo) -> Result<Self::Sink, OutputError> {
    OutputWrapper::create(url, info)
  }
}

/// 转码循环的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
  /// 输入流读完
  Exhausted,
  /// 解码失败，按宽松策略停止
  DecodeStopped,
  /// 被取消
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
  pub frames_written: u64,
  pub ending: StreamEnd,
  pub stream: StreamInfo,
}

#[derive(Error, Debug)]
pub enum TranscodeError {
  #[error("open: 无法打开输入流: {0}")]
  StreamOpen(#[source] InputError),
  #[error("create: 无法创建输出流: {0}")]
  StreamCreate(#[source] OutputError),
  #[error("detect: 第 {frame} 帧检测失败: {source}")]
  Detect { frame: u64, source: BoxError },
  #[error("summarize: 第 {frame} 帧汇总失败: {source}")]
  Summarize { frame: u64, source: SummarizeError },
  #[error("write: 第 {frame} 帧写入失败: {source}")]
  Write { frame: u64, source: OutputError },
  #[error("finish: 输出流封装失败: {0}")]
  Finish(#[source] OutputError),
  #[error(
    "decode: 写入 {frames_written} 帧后解码失败: {source}{}",
    finish_note(.finish)
  )]
  PartialFailure {
    frames_written: u64,
    source: InputError,
    /// 封装已写入部分时的错误
    finish: Option<OutputError>,
  },
}

fn finish_note(finish: &Option<OutputError>) -> String {
  finish
    .as_ref()
    .map_or_else(String::new, |e| format!("; finish: 输出流封装也失败: {}", e))
}

/// 视频转码任务
///
/// 逐帧解码、检测、汇总并写入标注后的帧。输入输出流在每条返回路径上
/// 都会被释放；检测、汇总或写入失败时放弃不完整的输出。
pub struct Transcoder<D> {
  detector: D,
  summarizer: Summarizer,
  thresholds: Thresholds,
  lenient_decode_stop: bool,
  cancel: CancelToken,
}

impl<D: Detector> Transcoder<D> {
  pub fn new(detector: D) -> Self {
    Self {
      detector,
      summarizer: Summarizer::default(),
      thresholds: Thresholds::default(),
      lenient_decode_stop: true,
      cancel: CancelToken::default(),
    }
  }

  pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
    self.summarizer = summarizer;
    self
  }

  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
    self.thresholds = thresholds;
    self
  }

  /// 解码中途失败时是否视为正常结束，默认 `true`
  pub fn with_lenient_decode_stop(mut self, lenient: bool) -> Self {
    self.lenient_decode_stop = lenient;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn transcode<O: MediaOpener>(
    &self,
    opener: &O,
    input: &Url,
    output: &Url,
  ) -> Result<TranscodeReport, TranscodeError> {
    info!("开始转码: {} -> {}", input, output);

    let mut source = opener.open_source(input).map_err(|e| {
      error!("无法打开输入流 {}: {}", input, e);
      TranscodeError::StreamOpen(e)
    })?;
    let stream = source.stream_info();
    info!("输入视频流: {}", stream);

    let mut sink = opener.create_sink(output, &stream).map_err(|e| {
      error!("无法创建输出流 {}: {}", output, e);
      TranscodeError::StreamCreate(e)
    })?;

    let class_names = self.detector.class_names();
    let mut frames_written = 0u64;
    let ending = loop {
      if self.cancel.is_cancelled() {
        warn!("任务已取消，已写入 {} 帧", frames_written);
        break StreamEnd::Cancelled;
      }

      let frame = match source.next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => break StreamEnd::Exhausted,
        Err(e) if self.lenient_decode_stop => {
          warn!("第 {} 帧解码失败，停止转码: {}", frames_written + 1, e);
          break StreamEnd::DecodeStopped;
        }
        Err(e) => {
          error!("第 {} 帧解码失败: {}", frames_written + 1, e);
          let finish = sink.finish().err();
          if let Some(finish) = &finish {
            error!("输出流封装失败: {}", finish);
          }
          return Err(TranscodeError::PartialFailure {
            frames_written,
            source: e,
            finish,
          });
        }
      };
      let index = frames_written + 1;

      let result = match self.detector.detect(&frame, self.thresholds) {
        Ok(result) => result,
        Err(e) => {
          error!("第 {} 帧检测失败: {}", index, e);
          sink.discard();
          return Err(TranscodeError::Detect {
            frame: index,
            source: Box::new(e),
          });
        }
      };

      // 视频路径只保留标注后的帧，说明仅记录到日志
      let summary = match self.summarizer.summarize(&frame, &result, class_names) {
        Ok(summary) => summary,
        Err(e) => {
          error!("第 {} 帧汇总失败: {}", index, e);
          sink.discard();
          return Err(TranscodeError::Summarize {
            frame: index,
            source: e,
          });
        }
      };

      if let Err(e) = sink.write_frame(&summary.image) {
        error!("第 {} 帧写入失败: {}", index, e);
        sink.discard();
        return Err(TranscodeError::Write {
          frame: index,
          source: e,
        });
      }
      frames_written = index;
      info!("处理第 {} 帧: {}", index, summary.caption);
    };

    sink.finish().map_err(|e| {
      error!("输出流封装失败: {}", e);
      TranscodeError::Finish(e)
    })?;

    info!("转码完成: 写入 {} 帧 ({:?})", frames_written, ending);
    Ok(TranscodeReport {
      frames_written,
      ending,
      stream,
    })
  }
}

#[derive(Error, Debug)]
pub enum ImageTaskError {
  #[error("open: 无法读取图像: {0}")]
  Input(#[from] ImageFileInputError),
  #[error("detect: 检测失败: {0}")]
  Detect(#[source] BoxError),
  #[error("summarize: 汇总失败: {0}")]
  Summarize(#[from] SummarizeError),
  #[error("write: 保存标注图像失败: {0}")]
  Save(#[from] SaveImageFileError),
}

/// 图片检测结果
#[derive(Debug, Clone)]
pub struct ImageReport {
  pub caption: Caption,
  pub image: RgbImage,
  pub result: DetectResult,
}

/// 单张图片检测任务
pub struct ImageTask<D> {
  detector: D,
  summarizer: Summarizer,
  thresholds: Thresholds,
}

impl<D: Detector> ImageTask<D> {
  pub fn new(detector: D) -> Self {
    Self {
      detector,
      summarizer: Summarizer::default(),
      thresholds: Thresholds::default(),
    }
  }

  pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
    self.summarizer = summarizer;
    self
  }

  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
    self.thresholds = thresholds;
    self
  }

  /// 读取图像、检测并汇总；给定输出地址时保存标注后的图像
  pub fn run(&self, input: &Url, output: Option<&Url>) -> Result<ImageReport, ImageTaskError> {
    info!("开始任务: {}", input);
    let mut source = ImageFileInput::from_url(input)?;
    let image = source
      .take_image()
      .ok_or(ImageFileInputError::EmptyImage)?;

    let report = self.run_image(&image)?;

    if let Some(output) = output {
      SaveImageFileOutput::from_url(output)?.save(&report.image)?;
    }
    Ok(report)
  }

  pub fn run_image(&self, image: &RgbImage) -> Result<ImageReport, ImageTaskError> {
    let now = std::time::Instant::now();
    let result = self
      .detector
      .detect(image, self.thresholds)
      .map_err(|e| ImageTaskError::Detect(Box::new(e)))?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    let summary = self
      .summarizer
      .summarize(image, &result, self.detector.class_names())?;
    info!("{}", summary.caption);

    Ok(ImageReport {
      caption: summary.caption,
      image: summary.image,
      result,
    })
  }
}
