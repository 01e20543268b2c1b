// 该文件是 Extinguisher 项目的一部分。
// src/alert/directory.rs - 保存在 JSON 文件中的收件人名单
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
  io::ErrorKind,
  path::{Path, PathBuf},
};

use tracing::{debug, info};

use super::{AlertError, Recipient, RecipientDirectory};

/// JSON 文件收件人名单
///
/// 文件内容为 `[{"name": "...", "email": "..."}]`；文件不存在时视为空名单。
pub struct JsonRecipientDirectory {
  path: PathBuf,
}

impl JsonRecipientDirectory {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save(&self, recipients: &[Recipient]) -> Result<(), AlertError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    // 先写临时文件再替换，避免写到一半的名单
    let tmp = self.path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(recipients)?)?;
    std::fs::rename(&tmp, &self.path)?;
    Ok(())
  }
}

impl RecipientDirectory for JsonRecipientDirectory {
  fn list_recipients(&self) -> Result<Vec<Recipient>, AlertError> {
    let content = match std::fs::read(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!("收件人名单不存在: {}", self.path.display());
        return Ok(Vec::new());
      }
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&content)?)
  }

  fn add_recipient(&mut self, recipient: Recipient) -> Result<(), AlertError> {
    recipient.validate()?;
    let mut recipients = self.list_recipients()?;
    info!("添加收件人: {}", recipient);
    recipients.push(recipient);
    self.save(&recipients)
  }
}
