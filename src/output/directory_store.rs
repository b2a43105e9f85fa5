// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output/directory_store.rs - 按确认结果/标签分目录保存
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Persist, SaveRequest, SavedImage, write_whole_file},
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryStoreError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法创建目录 {0}: {1}")]
  CreateDir(PathBuf, std::io::Error),
  #[error("无法写入文件 {0}: {1}")]
  Write(PathBuf, std::io::Error),
  #[error("记录序列化错误: {0}")]
  Record(#[from] serde_json::Error),
}

/// 基础目录，文件保存到 `<root>/<Agree|Disagree>/<label>/`
///
/// URL 形如 `folder:///data/captures`，追加 `?record` 时在图像旁写入
/// 同名 `.json` 记录全部类别分数。
#[derive(Debug, Clone)]
pub struct DirectoryStore {
  root: PathBuf,
  record: bool,
}

impl FromUrlWithScheme for DirectoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryStore {
  type Error = DirectoryStoreError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryStoreError::SchemeMismatch);
    }

    Ok(DirectoryStore {
      root: url_file_path(uri),
      record: uri.query_pairs().any(|(k, _)| k == "record"),
    })
  }
}

impl DirectoryStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      record: false,
    }
  }

  pub fn with_record(mut self, record: bool) -> Self {
    self.record = record;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn ensure_subdir(parent: &Path, name: &str) -> Result<PathBuf, DirectoryStoreError> {
    let dir = parent.join(name);
    if !dir.is_dir() {
      std::fs::create_dir_all(&dir).map_err(|e| DirectoryStoreError::CreateDir(dir.clone(), e))?;
    }
    Ok(dir)
  }

  fn record_scores(&self, path: &Path, request: &SaveRequest<'_>) -> Result<(), DirectoryStoreError> {
    let scores = request
      .prediction
      .map(|prediction| {
        prediction
          .items
          .iter()
          .map(|item| serde_json::json!({ "label": item.label, "score": item.score }))
          .collect::<Vec<_>>()
      })
      .unwrap_or_default();

    let record = serde_json::json!({
      "decision": request.decision.folder_name(),
      "label": request.chosen_label,
      "camera_label": request.camera_label,
      "camera_confidence": request.camera_confidence,
      "date": request.date.format("%Y-%m-%d").to_string(),
      "scores": scores,
    });

    let record_path = path.with_extension("json");
    let bytes = serde_json::to_vec_pretty(&record)?;
    write_whole_file(&record_path, &bytes)
      .map_err(|e| DirectoryStoreError::Write(record_path.clone(), e))
  }
}

impl Persist for DirectoryStore {
  type Error = DirectoryStoreError;

  fn save(&self, request: &SaveRequest<'_>) -> Result<SavedImage, Self::Error> {
    let decision_dir = Self::ensure_subdir(&self.root, request.decision.folder_name())?;
    let label_dir = Self::ensure_subdir(&decision_dir, request.chosen_label)?;

    let path = label_dir.join(request.file_name());
    write_whole_file(&path, request.image_png)
      .map_err(|e| DirectoryStoreError::Write(path.clone(), e))?;

    if self.record {
      // 图像已经写入，记录失败只告警
      if let Err(e) = self.record_scores(&path, request) {
        warn!("写入分数记录失败: {}", e);
      }
    }

    info!("保存图像到: {}", path.display());
    Ok(SavedImage {
      path,
      relative: request.relative_path(),
      downloaded: false,
    })
  }
}
