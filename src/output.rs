// 该文件是 Biaozhu （标注） 项目的一部分。
// src/output.rs - 采集结果保存
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

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Prediction};

mod directory_store;
mod download_store;

pub use self::directory_store::{DirectoryStore, DirectoryStoreError};
pub use self::download_store::{DownloadStore, DownloadStoreError};

/// 用户对模型判断的确认结果，同时是第一级目录名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Agree,
  Disagree,
}

impl Decision {
  pub fn folder_name(&self) -> &'static str {
    match self {
      Decision::Agree => "Agree",
      Decision::Disagree => "Disagree",
    }
  }
}

impl fmt::Display for Decision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.folder_name())
  }
}

/// 一次保存请求
#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
  pub decision: Decision,
  /// 目录分类（同意时等于模型判断，不同意时为用户选择）
  pub chosen_label: &'a str,
  /// 模型判断，仅用于文件名
  pub camera_label: &'a str,
  pub camera_confidence: f32,
  pub date: NaiveDate,
  pub image_png: &'a [u8],
  pub prediction: Option<&'a Prediction>,
}

impl SaveRequest<'_> {
  pub fn file_name(&self) -> String {
    capture_file_name(self.date, self.camera_label, self.camera_confidence)
  }

  /// `Agree/Snyders/20240501_Snyders_87%.png`
  pub fn relative_path(&self) -> String {
    format!(
      "{}/{}/{}",
      self.decision.folder_name(),
      self.chosen_label,
      self.file_name()
    )
  }

  /// 无基础目录时使用的扁平文件名
  pub fn flattened_file_name(&self) -> String {
    format!(
      "{}_{}_{}",
      self.decision.folder_name(),
      self.chosen_label,
      self.file_name()
    )
  }
}

/// 置信度百分比：四舍五入（远离零），不截断、不归一化
pub fn confidence_percent(confidence: f32) -> String {
  format!("{:.0}", (confidence as f64 * 100.0).round())
}

/// `YYYYMMDD_<cameraLabel>_<percent>%.png`
pub fn capture_file_name(date: NaiveDate, camera_label: &str, confidence: f32) -> String {
  format!(
    "{}_{}_{}%.png",
    date.format("%Y%m%d"),
    camera_label,
    confidence_percent(confidence)
  )
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Cursor::new(Vec::new());
  image.write_to(&mut buffer, ImageFormat::Png)?;
  Ok(buffer.into_inner())
}

/// 整体写入：先写临时文件再重命名，失败时不会留下半个文件
pub(crate) fn write_whole_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let file_name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  let temp = path.with_file_name(format!(".{}.part", file_name));
  let result = std::fs::write(&temp, bytes).and_then(|_| std::fs::rename(&temp, path));
  if result.is_err() {
    let _ = std::fs::remove_file(&temp);
  }
  debug!("写入文件 {} ({} 字节)", path.display(), bytes.len());
  result
}

/// 保存成功后的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
  pub path: PathBuf,
  pub relative: String,
  pub downloaded: bool,
}

impl fmt::Display for SavedImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.downloaded {
      write!(f, "Saved (download): {}", self.relative)
    } else {
      write!(f, "Saved: {}", self.relative)
    }
  }
}

pub trait Persist {
  type Error;
  fn save(&self, request: &SaveRequest<'_>) -> Result<SavedImage, Self::Error>;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("目录保存错误: {0}")]
  DirectoryStoreError(#[from] DirectoryStoreError),
  #[error("下载保存错误: {0}")]
  DownloadStoreError(#[from] DownloadStoreError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 输出配置：`folder://` 为已授权的基础目录，`download://` 只设置回退下载目录
pub enum OutputWrapper {
  Folder(DirectoryStore),
  Download(DownloadStore),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryStore::SCHEME => Ok(OutputWrapper::Folder(DirectoryStore::from_url(url)?)),
      DownloadStore::SCHEME => Ok(OutputWrapper::Download(DownloadStore::from_url(url)?)),
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

/// 保存入口：有基础目录时写入目录结构，否则回退为下载
pub struct Storage {
  base: Option<DirectoryStore>,
  fallback: DownloadStore,
}

impl Storage {
  pub fn new(fallback: DownloadStore) -> Self {
    Self {
      base: None,
      fallback,
    }
  }

  pub fn with_output(mut self, output: OutputWrapper) -> Self {
    match output {
      OutputWrapper::Folder(store) => self.base = Some(store),
      OutputWrapper::Download(store) => self.fallback = store,
    }
    self
  }

  pub fn grant(&mut self, store: DirectoryStore) {
    info!("已授权保存目录: {}", store.root().display());
    self.base = Some(store);
  }

  pub fn base_directory(&self) -> Option<&Path> {
    self.base.as_ref().map(DirectoryStore::root)
  }
}

impl Persist for Storage {
  type Error = OutputError;

  fn save(&self, request: &SaveRequest<'_>) -> Result<SavedImage, Self::Error> {
    match &self.base {
      Some(store) => Ok(store.save(request)?),
      None => Ok(self.fallback.save(request)?),
    }
  }
}
