// 该文件是 Extinguisher 项目的一部分。
// tests/transcode.rs - 视频转码任务测试
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
  cell::{Cell, RefCell},
  collections::VecDeque,
  rc::Rc,
};

use image::{Rgb, RgbImage};
use url::Url;

use extinguisher::{
  StreamInfo,
  input::{FrameSource, InputError},
  model::{ClassNames, DetectItem, DetectResult, Detector, LatencySample, Thresholds},
  output::{FrameSink, OutputError},
  summary::SummarizeError,
  task::{CancelToken, MediaOpener, StreamEnd, TranscodeError, Transcoder, UrlMediaOpener},
};

#[derive(Debug, thiserror::Error)]
#[error("scripted detector failure")]
struct ScriptedFailure;

/// 按帧序号返回预设检测结果的检测器
struct ScriptedDetector {
  names: ClassNames,
  script: Vec<Vec<u32>>,
  fail_at: Option<usize>,
  cancel_at: Option<(usize, CancelToken)>,
  calls: Cell<usize>,
}

impl ScriptedDetector {
  fn new(script: Vec<Vec<u32>>) -> Self {
    Self {
      names: ClassNames::new(["fire", "smoke"]),
      script,
      fail_at: None,
      cancel_at: None,
      calls: Cell::new(0),
    }
  }

  fn quiet() -> Self {
    Self::new(Vec::new())
  }
}

impl Detector for ScriptedDetector {
  type Error = ScriptedFailure;

  fn class_names(&self) -> &ClassNames {
    &self.names
  }

  fn detect(&self, _image: &RgbImage, thresholds: Thresholds) -> Result<DetectResult, Self::Error> {
    let call = self.calls.get() + 1;
    self.calls.set(call);
    if self.fail_at == Some(call) {
      return Err(ScriptedFailure);
    }
    if let Some((at, token)) = &self.cancel_at
      && *at == call
    {
      token.cancel();
    }

    let items = self
      .script
      .get(call - 1)
      .map(|ids| {
        ids
          .iter()
          .map(|&class_id| DetectItem {
            class_id,
            score: 0.9,
            bbox: [0.1, 0.1, 0.6, 0.6],
          })
          .collect()
      })
      .unwrap_or_default();
    Ok(DetectResult::new(
      items,
      LatencySample::new().with_stage("inference", 48.0),
      thresholds,
    ))
  }
}

/// 记录输入输出流的生命周期
#[derive(Default)]
struct Probe {
  source_closed: Cell<bool>,
  sink_created: Cell<Option<StreamInfo>>,
  sink_finished: Cell<bool>,
  sink_discarded: Cell<bool>,
  sink_closed: Cell<bool>,
  written: RefCell<Vec<RgbImage>>,
}

struct FakeSource {
  frames: VecDeque<Result<RgbImage, String>>,
  info: StreamInfo,
  probe: Rc<Probe>,
}

impl FrameSource for FakeSource {
  fn stream_info(&self) -> StreamInfo {
    self.info
  }

  fn next_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    match self.frames.pop_front() {
      Some(Ok(frame)) => Ok(Some(frame)),
      Some(Err(message)) => Err(InputError::Decode(message)),
      None => Ok(None),
    }
  }
}

impl Drop for FakeSource {
  fn drop(&mut self) {
    self.probe.source_closed.set(true);
  }
}

struct FakeSink {
  probe: Rc<Probe>,
  fail_write_at: Option<usize>,
  fail_finish: bool,
}

impl FrameSink for FakeSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), OutputError> {
    let index = self.probe.written.borrow().len() + 1;
    if self.fail_write_at == Some(index) {
      return Err(OutputError::Write("disk full".to_string()));
    }
    self.probe.written.borrow_mut().push(frame.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    self.probe.sink_finished.set(true);
    if self.fail_finish {
      return Err(OutputError::Write("moov atom not written".to_string()));
    }
    Ok(())
  }

  fn discard(&mut self) {
    self.probe.sink_discarded.set(true);
    self.probe.written.borrow_mut().clear();
  }
}

impl Drop for FakeSink {
  fn drop(&mut self) {
    self.probe.sink_closed.set(true);
  }
}

struct FakeOpener {
  frames: RefCell<Option<Vec<Result<RgbImage, String>>>>,
  probe: Rc<Probe>,
  fail_open: bool,
  fail_create: bool,
  fail_write_at: Option<usize>,
  fail_finish: bool,
}

impl FakeOpener {
  fn new(frames: Vec<Result<RgbImage, String>>) -> Self {
    Self {
      frames: RefCell::new(Some(frames)),
      probe: Rc::new(Probe::default()),
      fail_open: false,
      fail_create: false,
      fail_write_at: None,
      fail_finish: false,
    }
  }

  fn both_closed(&self) -> bool {
    self.probe.source_closed.get() && self.probe.sink_closed.get()
  }
}

impl MediaOpener for FakeOpener {
  type Source = FakeSource;
  type Sink = FakeSink;

  fn open_source(&self, _url: &Url) -> Result<Self::Source, InputError> {
    if self.fail_open {
      return Err(InputError::Decode("no such stream".to_string()));
    }
    let frames = self.frames.borrow_mut().take().unwrap_or_default();
    Ok(FakeSource {
      frames: frames.into_iter().collect(),
      info: info(),
      probe: Rc::clone(&self.probe),
    })
  }

  fn create_sink(&self, _url: &Url, info: &StreamInfo) -> Result<Self::Sink, OutputError> {
    if self.fail_create {
      return Err(OutputError::Write("read-only filesystem".to_string()));
    }
    self.probe.sink_created.set(Some(*info));
    Ok(FakeSink {
      probe: Rc::clone(&self.probe),
      fail_write_at: self.fail_write_at,
      fail_finish: self.fail_finish,
    })
  }
}

fn info() -> StreamInfo {
  StreamInfo {
    width: 32,
    height: 24,
    fps_num: 30000,
    fps_den: 1001,
  }
}

fn frame(shade: u8) -> RgbImage {
  RgbImage::from_pixel(32, 24, Rgb([shade, 90, 40]))
}

fn frames(n: u8) -> Vec<Result<RgbImage, String>> {
  (0..n).map(|i| Ok(frame(i * 10))).collect()
}

fn urls() -> (Url, Url) {
  (
    Url::parse("video:///in.mp4").unwrap(),
    Url::parse("video:///out.mp4").unwrap(),
  )
}

#[test]
fn frames_without_detections_pass_through_unchanged() {
  let opener = FakeOpener::new(frames(3));
  let (input, output) = urls();

  let report = Transcoder::new(ScriptedDetector::quiet())
    .transcode(&opener, &input, &output)
    .unwrap();

  assert_eq!(report.frames_written, 3);
  assert_eq!(report.ending, StreamEnd::Exhausted);
  assert_eq!(report.stream, info());
  assert_eq!(opener.probe.sink_created.get(), Some(info()));

  let written = opener.probe.written.borrow();
  for (i, image) in written.iter().enumerate() {
    assert_eq!(*image, frame(i as u8 * 10));
  }
  assert!(opener.probe.sink_finished.get());
  assert!(!opener.probe.sink_discarded.get());
  assert!(opener.both_closed());
}

#[test]
fn detections_are_burned_into_written_frames() {
  let opener = FakeOpener::new(frames(2));
  let (input, output) = urls();
  let detector = ScriptedDetector::new(vec![vec![0], vec![1, 1]]);

  let report = Transcoder::new(detector)
    .transcode(&opener, &input, &output)
    .unwrap();

  assert_eq!(report.frames_written, 2);
  let written = opener.probe.written.borrow();
  assert_ne!(written[0], frame(0));
  assert_ne!(written[1], frame(10));
}

#[test]
fn unknown_class_aborts_and_discards_output() {
  let opener = FakeOpener::new(frames(4));
  let (input, output) = urls();
  let detector = ScriptedDetector::new(vec![vec![0], vec![9]]);

  let err = Transcoder::new(detector)
    .transcode(&opener, &input, &output)
    .unwrap_err();

  match err {
    TranscodeError::Summarize { frame, source } => {
      assert_eq!(frame, 2);
      assert_eq!(
        source,
        SummarizeError::UnknownClass {
          class_id: 9,
          known: 2
        }
      );
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(opener.probe.sink_discarded.get());
  assert!(!opener.probe.sink_finished.get());
  assert!(opener.probe.written.borrow().is_empty());
  assert!(opener.both_closed());
}

#[test]
fn detector_failure_aborts_and_discards_output() {
  let opener = FakeOpener::new(frames(3));
  let (input, output) = urls();
  let mut detector = ScriptedDetector::quiet();
  detector.fail_at = Some(2);

  let err = Transcoder::new(detector)
    .transcode(&opener, &input, &output)
    .unwrap_err();

  assert!(matches!(err, TranscodeError::Detect { frame: 2, .. }));
  assert!(opener.probe.sink_discarded.get());
  assert!(opener.both_closed());
}

#[test]
fn write_failure_aborts_and_discards_output() {
  let mut opener = FakeOpener::new(frames(3));
  opener.fail_write_at = Some(3);
  let (input, output) = urls();

  let err = Transcoder::new(ScriptedDetector::quiet())
    .transcode(&opener, &input, &output)
    .unwrap_err();

  assert!(matches!(err, TranscodeError::Write { frame: 3, .. }));
  assert!(opener.probe.sink_discarded.get());
  assert!(opener.both_closed());
}

#[test]
fn open_failure_never_creates_output() {
  let mut opener = FakeOpener::new(frames(1));
  opener.fail_open = true;
  let (input, output) = urls();

  let err = Transcoder::new(ScriptedDetector::quiet())
    .transcode(&opener, &input, &output)
    .unwrap_err();

  assert!(matches!(err, TranscodeError::StreamOpen(_)));
  assert!(opener.probe.sink_created.get().is_none());
}

#[test]
fn create_failure_releases_source() {
  let mut opener = FakeOpener::new(frames(2));
  opener.fail_create = true;
  let (input, output) = urls();
  let detector = ScriptedDetector::quiet();

  let transcoder = Transcoder::new(detector);
  let err = transcoder.transcode(&opener, &input, &output).unwrap_err();

  assert!(matches!(err, TranscodeError::StreamCreate(_)));
  assert!(opener.probe.source_closed.get());
}

#[test]
fn lenient_decode_stop_keeps_written_frames() {
  let mut stream = frames(2);
  stream.push(Err("corrupt packet".to_string()));
  stream.push(Ok(frame(200)));
  let opener = FakeOpener::new(stream);
  let (input, output) = urls();

  let report = Transcoder::new(ScriptedDetector::quiet())
    .transcode(&opener, &input, &output)
    .unwrap();

  assert_eq!(report.frames_written, 2);
  assert_eq!(report.ending, StreamEnd::DecodeStopped);
  assert!(opener.probe.sink_finished.get());
  assert!(opener.both_closed());
}

#[test]
fn strict_decode_keeps_decode_error_when_finish_fails() {
  let mut stream = frames(3);
  stream.push(Err("corrupt packet".to_string()));
  let mut opener = FakeOpener::new(stream);
  opener.fail_finish = true;
  let (input, output) = urls();

  let err = Transcoder::new(ScriptedDetector::quiet())
    .with_lenient_decode_stop(false)
    .transcode(&opener, &input, &output)
    .unwrap_err();

  let message = err.to_string();
  match err {
    TranscodeError::PartialFailure {
      frames_written,
      source,
      finish,
    } => {
      assert_eq!(frames_written, 3);
      assert!(matches!(source, InputError::Decode(_)));
      assert!(matches!(finish, Some(OutputError::Write(_))));
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(message.starts_with("decode: "));
  assert!(message.contains("moov atom not written"));
  assert!(opener.both_closed());
}

#[test]
fn strict_decode_reports_partial_failure() {
  let mut stream = frames(2);
  stream.push(Err("corrupt packet".to_string()));
  let opener = FakeOpener::new(stream);
  let (input, output) = urls();

  let err = Transcoder::new(ScriptedDetector::quiet())
    .with_lenient_decode_stop(false)
    .transcode(&opener, &input, &output)
    .unwrap_err();

  match err {
    TranscodeError::PartialFailure {
      frames_written,
      source,
      finish,
    } => {
      assert_eq!(frames_written, 2);
      assert!(matches!(source, InputError::Decode(_)));
      assert!(finish.is_none());
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(opener.probe.sink_finished.get());
  assert!(!opener.probe.sink_discarded.get());
  assert_eq!(opener.probe.written.borrow().len(), 2);
  assert!(opener.both_closed());
}

#[test]
fn cancellation_stops_at_next_frame() {
  let opener = FakeOpener::new(frames(5));
  let (input, output) = urls();
  let cancel = CancelToken::new();
  let mut detector = ScriptedDetector::quiet();
  detector.cancel_at = Some((2, cancel.clone()));

  let report = Transcoder::new(detector)
    .with_cancel_token(cancel)
    .transcode(&opener, &input, &output)
    .unwrap();

  assert_eq!(report.frames_written, 2);
  assert_eq!(report.ending, StreamEnd::Cancelled);
  assert!(opener.probe.sink_finished.get());
  assert!(opener.both_closed());
}

#[test]
fn cancelled_before_start_writes_nothing() {
  let opener = FakeOpener::new(frames(3));
  let (input, output) = urls();
  let transcoder = Transcoder::new(ScriptedDetector::quiet());
  transcoder.cancel_token().cancel();

  let report = transcoder.transcode(&opener, &input, &output).unwrap();
  assert_eq!(report.frames_written, 0);
  assert_eq!(report.ending, StreamEnd::Cancelled);
  assert!(opener.both_closed());
}

fn write_sequence(dir: &std::path::Path, count: u8) {
  for i in 0..count {
    frame(i * 20)
      .save(dir.join(format!("frame_{:03}.png", i)))
      .unwrap();
  }
}

#[test]
fn folder_to_folder_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let source_dir = dir.path().join("in");
  std::fs::create_dir(&source_dir).unwrap();
  write_sequence(&source_dir, 3);
  let target_dir = dir.path().join("out");

  let input = Url::parse(&format!("folder://{}?fps=12", source_dir.display())).unwrap();
  let output = Url::parse(&format!("folder://{}", target_dir.display())).unwrap();
  let detector = ScriptedDetector::new(vec![vec![0], vec![], vec![1]]);

  let report = Transcoder::new(detector)
    .transcode(&UrlMediaOpener, &input, &output)
    .unwrap();

  assert_eq!(report.frames_written, 3);
  assert_eq!(report.stream.fps_num, 12);
  let unchanged = image::open(target_dir.join("frame_000002.png"))
    .unwrap()
    .into_rgb8();
  assert_eq!(unchanged, frame(20));
  let annotated = image::open(target_dir.join("frame_000001.png"))
    .unwrap()
    .into_rgb8();
  assert_ne!(annotated, frame(0));
}

#[test]
fn folder_output_is_removed_on_failure() {
  let dir = tempfile::tempdir().unwrap();
  let source_dir = dir.path().join("in");
  std::fs::create_dir(&source_dir).unwrap();
  write_sequence(&source_dir, 3);
  let target_dir = dir.path().join("out");

  let input = Url::parse(&format!("folder://{}", source_dir.display())).unwrap();
  let output = Url::parse(&format!("folder://{}", target_dir.display())).unwrap();
  let detector = ScriptedDetector::new(vec![vec![0], vec![0], vec![5]]);

  let err = Transcoder::new(detector)
    .transcode(&UrlMediaOpener, &input, &output)
    .unwrap_err();

  assert!(matches!(err, TranscodeError::Summarize { frame: 3, .. }));
  assert!(!target_dir.exists());
}
