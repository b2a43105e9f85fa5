// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input.rs - 摄像头/图像输入
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

use thiserror::Error;
use tracing::info;

use crate::{Build, FromUrl, frame::CameraFrame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, ImageFileStream};

#[cfg(feature = "v4l_input")]
mod v4l2_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_camera::{V4l2Camera, V4l2CameraError, V4l2CameraInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L2 摄像头错误: {0}")]
  V4l2CameraError(#[from] V4l2CameraError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 输入源配置，`build` 时才真正打开设备
#[derive(Debug, Clone)]
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l2Camera(V4l2CameraInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2CameraInput::SCHEME {
        return Ok(InputWrapper::V4l2Camera(V4l2CameraInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Build for InputWrapper {
  type Target = CameraStream;
  type Error = InputError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    info!("打开输入源");
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => Ok(CameraStream::ReadImageFile(input.build()?)),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => Ok(CameraStream::V4l2Camera(input.build()?)),
    }
  }
}

/// 已打开的帧流，drop 即释放摄像头
pub enum CameraStream {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileStream),
  #[cfg(feature = "v4l_input")]
  V4l2Camera(V4l2Camera),
}

impl Iterator for CameraStream {
  type Item = Result<CameraFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      CameraStream::ReadImageFile(input) => input.next().map(|r| r.map_err(InputError::from)),
      #[cfg(feature = "v4l_input")]
      CameraStream::V4l2Camera(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}
