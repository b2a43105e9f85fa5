// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/download_store.rs - 无基础目录时的下载回退
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

use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Persist, SaveRequest, SavedImage, write_whole_file},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DownloadStoreError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("下载目录不存在: {0}")]
  MissingDirectory(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 扁平文件名写入下载目录：`<Agree|Disagree>_<label>_<文件名>`
#[derive(Debug, Clone)]
pub struct DownloadStore {
  directory: PathBuf,
}

impl FromUrlWithScheme for DownloadStore {
  const SCHEME: &'static str = "download";
}

impl FromUrl for DownloadStore {
  type Error = DownloadStoreError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DownloadStoreError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(DownloadStore {
      directory: url_file_path(uri),
    })
  }
}

impl Default for DownloadStore {
  fn default() -> Self {
    Self::new(".")
  }
}

impl DownloadStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }
}

impl Persist for DownloadStore {
  type Error = DownloadStoreError;

  fn save(&self, request: &SaveRequest<'_>) -> Result<SavedImage, Self::Error> {
    // 下载目录由用户给出，不代为创建
    if !self.directory.is_dir() {
      return Err(DownloadStoreError::MissingDirectory(self.directory.clone()));
    }

    let path = self.directory.join(request.flattened_file_name());
    write_whole_file(&path, request.image_png)?;

    warn!("未授权保存目录，已下载到: {}", path.display());
    Ok(SavedImage {
      path,
      relative: request.relative_path(),
      downloaded: true,
    })
  }
}
