// 该文件是 Extinguisher 项目的一部分。
// src/alert/outbox.rs - 写入发件箱目录的警报传输
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
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{DateTime, Local};
use tracing::info;

use super::{AlertTransport, DeliveryError, Recipient, has_control_chars, is_plausible_address};

/// 发件箱传输
///
/// 每次投递在发件箱目录中写入一个 RFC 5322 格式的 `.eml` 文件，
/// 由本地邮件代理负责实际发送。程序本身不持有任何邮件凭据。
pub struct OutboxTransport {
  directory: PathBuf,
  from: String,
  sequence: AtomicU32,
}

impl OutboxTransport {
  pub fn new(directory: impl Into<PathBuf>, from: impl Into<String>) -> Result<Self, DeliveryError> {
    let from = from.into();
    if !is_plausible_address(&from) {
      return Err(DeliveryError::InvalidAddress(from));
    }
    let directory = directory.into();
    std::fs::create_dir_all(&directory)?;
    Ok(Self {
      directory,
      from,
      sequence: AtomicU32::new(0),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn message_path(&self, now: &DateTime<Local>, recipient: &Recipient) -> PathBuf {
    let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
    let mailbox = recipient
      .email
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
      .collect::<String>();
    self.directory.join(format!(
      "{}-{:04}-{}.eml",
      now.format("%Y%m%dT%H%M%S%.3f"),
      sequence,
      mailbox
    ))
  }
}

impl AlertTransport for OutboxTransport {
  fn send_message(
    &self,
    recipient: &Recipient,
    subject: &str,
    body: &str,
  ) -> Result<(), DeliveryError> {
    if !is_plausible_address(&recipient.email) {
      return Err(DeliveryError::InvalidAddress(recipient.email.clone()));
    }
    // 名单文件可能绕过 Recipient::new 直接写入
    for header in [recipient.name.as_str(), subject] {
      if has_control_chars(header) {
        return Err(DeliveryError::InvalidHeader(header.to_string()));
      }
    }

    let now = Local::now();
    let message = compose_message(&self.from, recipient, subject, body, &now);
    let path = self.message_path(&now, recipient);
    std::fs::write(&path, message)?;
    info!("警报邮件写入发件箱: {}", path.display());
    Ok(())
  }
}

fn compose_message(
  from: &str,
  recipient: &Recipient,
  subject: &str,
  body: &str,
  date: &DateTime<Local>,
) -> String {
  let mut message = String::new();
  message.push_str(&format!("From: {}\r\n", from));
  message.push_str(&format!(
    "To: {} <{}>\r\n",
    display_name(&recipient.name),
    recipient.email
  ));
  message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
  message.push_str(&format!("Date: {}\r\n", date.to_rfc2822()));
  message.push_str("MIME-Version: 1.0\r\n");
  message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
  message.push_str("Content-Transfer-Encoding: 8bit\r\n");
  message.push_str("\r\n");
  for line in body.lines() {
    message.push_str(line);
    message.push_str("\r\n");
  }
  message
}

/// 非 ASCII 头部使用 RFC 2047 编码
fn encode_header(value: &str) -> String {
  if value.is_ascii() {
    value.to_string()
  } else {
    format!("=?UTF-8?B?{}?=", base64_encode(value.as_bytes()))
  }
}

// RFC 5322 中需要加引号的字符
const SPECIALS: &[char] = &[
  '(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"',
];

/// 收件人显示名：非 ASCII 用 RFC 2047 编码，含特殊字符时写成带引号的字符串
fn display_name(name: &str) -> String {
  if !name.is_ascii() {
    encode_header(name)
  } else if name.contains(SPECIALS) {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
  } else {
    name.to_string()
  }
}

fn base64_encode(data: &[u8]) -> String {
  const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

  let mut result = String::with_capacity(data.len().div_ceil(3) * 4);
  for chunk in data.chunks(3) {
    let b0 = chunk[0] as usize;
    let b1 = chunk.get(1).copied().unwrap_or(0) as usize;
    let b2 = chunk.get(2).copied().unwrap_or(0) as usize;
    let combined = (b0 << 16) | (b1 << 8) | b2;

    result.push(ALPHABET[(combined >> 18) & 0x3F] as char);
    result.push(ALPHABET[(combined >> 12) & 0x3F] as char);
    result.push(if chunk.len() > 1 {
      ALPHABET[(combined >> 6) & 0x3F] as char
    } else {
      '='
    });
    result.push(if chunk.len() > 2 {
      ALPHABET[combined & 0x3F] as char
    } else {
      '='
    });
  }
  result
}
