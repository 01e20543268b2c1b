// 该文件是 Extinguisher 项目的一部分。
// src/alert.rs - 火情警报：收件人名单与广播
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

//! # 火情警报
//!
//! 从收件人名单读取联系人，逐个通过传输层发送警报邮件。
//! 单个收件人发送失败不会中断广播，结果逐一记录在 [`BroadcastReport`] 中。

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

mod directory;
pub use self::directory::JsonRecipientDirectory;

mod outbox;
pub use self::outbox::OutboxTransport;

pub const DEFAULT_SUBJECT: &str = "❗Alert there is a fire❗";
pub const DEFAULT_BODY: &str =
  "A forest fire has been detected near your area.\nPlease stay safe and take necessary precautions.";

#[derive(Error, Debug)]
pub enum AlertError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("收件人名单格式错误: {0}")]
  DirectoryFormat(#[from] serde_json::Error),
  #[error("无效的收件人: {0}")]
  InvalidRecipient(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的邮件地址: {0}")]
  InvalidAddress(String),
  #[error("邮件头包含控制字符: {0:?}")]
  InvalidHeader(String),
  #[error("投递被拒绝: {0}")]
  Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
  pub name: String,
  pub email: String,
}

impl Recipient {
  /// 创建收件人；名字不能为空且不含控制字符，邮件地址必须包含 `@`
  pub fn new(name: impl Into<String>, email: impl Into<String>) -> Result<Self, AlertError> {
    let recipient = Recipient {
      name: name.into().trim().to_string(),
      email: email.into().trim().to_string(),
    };
    recipient.validate()?;
    Ok(recipient)
  }

  pub fn validate(&self) -> Result<(), AlertError> {
    if self.name.trim().is_empty() {
      return Err(AlertError::InvalidRecipient("名字为空".to_string()));
    }
    if has_control_chars(&self.name) {
      return Err(AlertError::InvalidRecipient(format!(
        "名字包含控制字符: {:?}",
        self.name
      )));
    }
    if !is_plausible_address(&self.email) {
      return Err(AlertError::InvalidRecipient(format!(
        "邮件地址无效: '{}'",
        self.email
      )));
    }
    Ok(())
  }
}

impl std::fmt::Display for Recipient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} <{}>", self.name, self.email)
  }
}

// 写入邮件头的文本不能含 CR、LF 等控制字符
pub(crate) fn has_control_chars(value: &str) -> bool {
  value.chars().any(char::is_control)
}

pub(crate) fn is_plausible_address(email: &str) -> bool {
  match email.split_once('@') {
    Some((local, domain)) => {
      !local.is_empty()
        && !domain.is_empty()
        && !email.chars().any(|c| c.is_whitespace() || c.is_control())
    }
    None => false,
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
  pub subject: String,
  pub body: String,
}

impl Default for AlertMessage {
  fn default() -> Self {
    Self {
      subject: DEFAULT_SUBJECT.to_string(),
      body: DEFAULT_BODY.to_string(),
    }
  }
}

/// 收件人名单
pub trait RecipientDirectory {
  fn list_recipients(&self) -> Result<Vec<Recipient>, AlertError>;

  fn add_recipient(&mut self, recipient: Recipient) -> Result<(), AlertError>;
}

/// 警报传输层
pub trait AlertTransport {
  fn send_message(
    &self,
    recipient: &Recipient,
    subject: &str,
    body: &str,
  ) -> Result<(), DeliveryError>;
}

#[derive(Debug)]
pub struct DeliveryOutcome {
  pub recipient: Recipient,
  pub result: Result<(), DeliveryError>,
}

/// 一次广播的逐个投递结果
#[derive(Debug, Default)]
pub struct BroadcastReport {
  pub outcomes: Vec<DeliveryOutcome>,
}

impl BroadcastReport {
  pub fn is_empty(&self) -> bool {
    self.outcomes.is_empty()
  }

  pub fn len(&self) -> usize {
    self.outcomes.len()
  }

  pub fn delivered(&self) -> impl Iterator<Item = &Recipient> {
    self
      .outcomes
      .iter()
      .filter(|o| o.result.is_ok())
      .map(|o| &o.recipient)
  }

  pub fn failed(&self) -> impl Iterator<Item = (&Recipient, &DeliveryError)> {
    self
      .outcomes
      .iter()
      .filter_map(|o| o.result.as_ref().err().map(|e| (&o.recipient, e)))
  }

  pub fn all_delivered(&self) -> bool {
    self.outcomes.iter().all(|o| o.result.is_ok())
  }
}

/// 向名单中的每个收件人发送警报
///
/// 只有读取名单失败会返回错误；单个投递失败记录在报告中。
pub fn broadcast<R, T>(
  directory: &R,
  transport: &T,
  message: &AlertMessage,
) -> Result<BroadcastReport, AlertError>
where
  R: RecipientDirectory + ?Sized,
  T: AlertTransport + ?Sized,
{
  let recipients = directory.list_recipients()?;
  if recipients.is_empty() {
    warn!("收件人名单为空，没有发送警报");
    return Ok(BroadcastReport::default());
  }

  info!("向 {} 位收件人发送警报: {}", recipients.len(), message.subject);
  let outcomes = recipients
    .into_iter()
    .map(|recipient| {
      let result = transport.send_message(&recipient, &message.subject, &message.body);
      match &result {
        Ok(()) => info!("警报已发送给 {}", recipient),
        Err(e) => error!("警报发送给 {} 失败: {}", recipient, e),
      }
      DeliveryOutcome { recipient, result }
    })
    .collect();

  Ok(BroadcastReport { outcomes })
}
