// 该文件是 Extinguisher 项目的一部分。
// src/bin/send_alert.rs - 火情警报广播
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

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use extinguisher::alert::{
  AlertMessage, DEFAULT_BODY, DEFAULT_SUBJECT, JsonRecipientDirectory, OutboxTransport, Recipient,
  RecipientDirectory, broadcast,
};

/// 向收件人名单广播火情警报
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 收件人名单 (JSON)
  #[arg(long, value_name = "FILE", default_value = "users.json")]
  pub directory: PathBuf,
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 发送警报
  Send {
    /// 发件箱目录，本地邮件代理从这里取信
    #[arg(long, value_name = "DIR")]
    outbox: PathBuf,
    /// 发件人地址
    #[arg(long, value_name = "ADDRESS")]
    from: String,
    /// 邮件主题
    #[arg(long, default_value = DEFAULT_SUBJECT)]
    subject: String,
    /// 邮件正文
    #[arg(long, default_value = DEFAULT_BODY)]
    body: String,
  },
  /// 添加收件人
  AddUser {
    /// 收件人名字
    #[arg(long)]
    name: String,
    /// 收件人邮件地址
    #[arg(long)]
    email: String,
  },
  /// 列出收件人
  List,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut directory = JsonRecipientDirectory::new(&args.directory);
  info!("收件人名单: {}", args.directory.display());

  match args.command {
    Command::Send {
      outbox,
      from,
      subject,
      body,
    } => {
      let transport = OutboxTransport::new(outbox, from)?;
      let report = broadcast(&directory, &transport, &AlertMessage { subject, body })?;
      if report.is_empty() {
        println!("No recipients found");
        return Ok(());
      }
      for recipient in report.delivered() {
        println!("Sent to {}", recipient);
      }
      for (recipient, error) in report.failed() {
        println!("Failed to send to {}: {}", recipient, error);
      }
      if !report.all_delivered() {
        anyhow::bail!("{} 封警报发送失败", report.failed().count());
      }
    }
    Command::AddUser { name, email } => {
      let recipient = Recipient::new(name, email)?;
      directory.add_recipient(recipient.clone())?;
      println!("Added {}", recipient);
    }
    Command::List => {
      let recipients = directory.list_recipients()?;
      if recipients.is_empty() {
        println!("No recipients found");
      }
      for recipient in recipients {
        println!("{}", recipient);
      }
    }
  }

  Ok(())
}
