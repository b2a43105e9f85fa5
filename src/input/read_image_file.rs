// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

//! 以图像文件或图像目录模拟摄像头。
//!
//! - `image:///path/to/frame.png` 反复输出同一张图像
//! - `image:///path/to/dir` 按文件名顺序循环输出目录中的图像
//! - 追加 `?once` 时只输出一轮，然后结束

use std::path::PathBuf;
use std::time::Instant;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{Build, FromUrl, FromUrlWithScheme, frame::CameraFrame, url_file_path};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in {0}")]
  NoImage(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ImageFileInput {
  path: PathBuf,
  once: bool,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Ok(ImageFileInput {
      path: url_file_path(url),
      once: url.query_pairs().any(|(k, _)| k == "once"),
    })
  }
}

fn has_image_extension(path: &std::path::Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

impl Build for ImageFileInput {
  type Target = ImageFileStream;
  type Error = ImageFileInputError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    let files = if self.path.is_dir() {
      let mut files = std::fs::read_dir(&self.path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect::<Vec<_>>();
      files.sort();
      files
    } else {
      // 单个文件直接打开，提前暴露解码错误
      ImageReader::open(&self.path)?.decode()?;
      vec![self.path.clone()]
    };

    if files.is_empty() {
      return Err(ImageFileInputError::NoImage(self.path.clone()));
    }

    info!("图像输入已打开: {} 个文件", files.len());
    Ok(ImageFileStream {
      files,
      cursor: 0,
      once: self.once,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

pub struct ImageFileStream {
  files: Vec<PathBuf>,
  cursor: usize,
  once: bool,
  frame_index: u64,
  start_time: Instant,
}

impl ImageFileStream {
  fn load(path: &std::path::Path) -> Result<RgbImage, ImageFileInputError> {
    debug!("读取图像: {}", path.display());
    Ok(ImageReader::open(path)?.decode()?.into_rgb8())
  }
}

impl Iterator for ImageFileStream {
  type Item = Result<CameraFrame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor >= self.files.len() {
      if self.once {
        return None;
      }
      self.cursor = 0;
    }

    let path = &self.files[self.cursor];
    self.cursor += 1;

    let frame = Self::load(path).map(|image| {
      let frame = CameraFrame::new(
        image,
        self.frame_index,
        self.start_time.elapsed().as_millis() as u64,
      );
      self.frame_index += 1;
      frame
    });
    Some(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn image_url(path: &std::path::Path, query: &str) -> Url {
    Url::parse(&format!("image://{}{}", path.display(), query)).unwrap()
  }

  #[test]
  fn directory_frames_cycle_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(2, 2, Rgb([10, 0, 0]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbImage::from_pixel(2, 2, Rgb([20, 0, 0]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let input = ImageFileInput::from_url(&image_url(dir.path(), "")).unwrap();
    let mut stream = input.build().unwrap();

    let reds = (0..3)
      .map(|_| stream.next().unwrap().unwrap().image.get_pixel(0, 0)[0])
      .collect::<Vec<_>>();
    assert_eq!(reds, vec![20, 10, 20]);
  }

  #[test]
  fn once_stops_after_single_pass() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("only.png");
    RgbImage::from_pixel(3, 3, Rgb([1, 1, 1])).save(&path).unwrap();

    let input = ImageFileInput::from_url(&image_url(&path, "?once")).unwrap();
    let mut stream = input.build().unwrap();
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.index, 0);
    assert!(stream.next().is_none());
  }

  #[test]
  fn empty_directory_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let input = ImageFileInput::from_url(&image_url(dir.path(), "")).unwrap();
    assert!(matches!(
      input.build(),
      Err(ImageFileInputError::NoImage(_))
    ));
  }

  #[test]
  fn missing_file_fails_to_open() {
    let input = ImageFileInput::from_url(&Url::parse("image:///no/such/frame.png").unwrap()).unwrap();
    assert!(matches!(input.build(), Err(ImageFileInputError::IoError(_))));
  }
}
