// 该文件是 Extinguisher 项目的一部分。
// src/model/cache.rs - 按模型路径缓存已加载的检测器
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, info};

/// 模型缓存
///
/// 每个模型路径只在首次使用时加载一次，之后共享同一个实例，直到进程退出。
/// 键空间很小，不做淘汰。
pub struct ModelCache<M> {
  entries: Mutex<HashMap<PathBuf, Arc<M>>>,
}

impl<M> Default for ModelCache<M> {
  fn default() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
    }
  }
}

impl<M> ModelCache<M> {
  pub fn new() -> Self {
    Self::default()
  }

  /// 获取缓存中的模型；不存在时调用 `load` 加载并缓存
  ///
  /// 加载失败不会写入缓存，下次调用会重新尝试。
  pub fn get_or_load<E, F>(&self, path: impl AsRef<Path>, load: F) -> Result<Arc<M>, E>
  where
    F: FnOnce(&Path) -> Result<M, E>,
  {
    let path = path.as_ref();
    // 加载期间持有锁，同一路径不会被并发加载两次
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(model) = entries.get(path) {
      debug!("模型缓存命中: {}", path.display());
      return Ok(Arc::clone(model));
    }

    info!("模型缓存未命中，加载模型: {}", path.display());
    let model = Arc::new(load(path)?);
    entries.insert(path.to_path_buf(), Arc::clone(&model));
    Ok(model)
  }

  pub fn contains(&self, path: impl AsRef<Path>) -> bool {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(path.as_ref())
  }

  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
