// 该文件是 Extinguisher 项目的一部分。
// src/ffmpeg.rs - ffmpeg 子进程的公共辅助
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
  collections::VecDeque,
  io::{BufRead, BufReader, ErrorKind, Read},
  process::{Command, Stdio},
  thread::JoinHandle,
};

use tracing::{debug, warn};

// 保留的 stderr 行数
const STDERR_TAIL_LINES: usize = 32;
// 单行读取上限，超出部分按新行处理
const STDERR_LINE_LIMIT: u64 = 1024;

/// 子进程 stderr 的尾部
///
/// 后台线程持续读空管道，只保留最后 [`STDERR_TAIL_LINES`] 行。
pub(crate) struct StderrTail {
  reader: Option<JoinHandle<VecDeque<String>>>,
}

impl StderrTail {
  pub(crate) fn spawn<R: Read + Send + 'static>(stderr: R) -> std::io::Result<Self> {
    let reader = std::thread::Builder::new()
      .name("ffmpeg-stderr".to_string())
      .spawn(move || drain(stderr))?;
    Ok(Self {
      reader: Some(reader),
    })
  }

  /// 等待读取线程结束并返回保留的内容；子进程退出之后调用
  pub(crate) fn collect(&mut self) -> String {
    match self.reader.take().map(JoinHandle::join) {
      Some(Ok(lines)) => Vec::from(lines).join("\n"),
      Some(Err(_)) => {
        warn!("stderr 读取线程异常退出");
        String::new()
      }
      None => String::new(),
    }
  }
}

fn drain<R: Read>(stderr: R) -> VecDeque<String> {
  let mut reader = BufReader::new(stderr);
  let mut lines = VecDeque::with_capacity(STDERR_TAIL_LINES);
  let mut line = Vec::new();
  loop {
    line.clear();
    match (&mut reader)
      .take(STDERR_LINE_LIMIT)
      .read_until(b'\n', &mut line)
    {
      Ok(0) => break,
      Ok(_) => {
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if text.is_empty() {
          continue;
        }
        debug!("ffmpeg: {}", text);
        if lines.len() == STDERR_TAIL_LINES {
          lines.pop_front();
        }
        lines.push_back(text.to_string());
      }
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => {
        warn!("读取 ffmpeg stderr 失败: {}", e);
        break;
      }
    }
  }
  lines
}

/// 查询本机 ffmpeg 是否带有指定编码器
pub(crate) fn encoder_available(name: &str) -> std::io::Result<bool> {
  let output = Command::new("ffmpeg")
    .arg("-hide_banner")
    .arg("-h")
    .arg(format!("encoder={}", name))
    .stdin(Stdio::null())
    .output()?;
  Ok(lists_encoder(&String::from_utf8_lossy(&output.stdout), name))
}

// `ffmpeg -h encoder=NAME` 的首行形如 `Encoder libx264 [libx264 H.264 / AVC ...]:`
fn lists_encoder(help: &str, name: &str) -> bool {
  help.lines().any(|line| {
    line
      .trim_start()
      .strip_prefix("Encoder ")
      .and_then(|rest| rest.split_whitespace().next())
      == Some(name)
  })
}
