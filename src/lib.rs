// 该文件是 Biaozhu （标注） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod session;
pub mod task;

#[cfg(test)]
mod fixture;

#[cfg(not(any(feature = "model_onnx", feature = "model_rknn")))]
compile_error!("至少需要启用一个模型后端特性: model_onnx 或 model_rknn");

#[cfg(not(any(feature = "read_image_file", feature = "v4l_input")))]
compile_error!("至少需要启用一个输入特性: read_image_file 或 v4l_input");

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 可重复构建的资源（摄像头、模型），会话恢复时据此重新获取
pub trait Build {
  type Target;
  type Error;
  fn build(&self) -> Result<Self::Target, Self::Error>;
}

/// 将 URL 路径解码为本地文件系统路径（处理 `%20` 等转义）
pub fn url_file_path(url: &url::Url) -> std::path::PathBuf {
  let raw = url.path();
  let decoded = urlencoding::decode(raw)
    .map(|path| path.into_owned())
    .unwrap_or_else(|_| raw.to_string());
  std::path::PathBuf::from(decoded)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_path_is_percent_decoded() {
    let url = url::Url::parse("folder:///tmp/my%20captures").unwrap();
    assert_eq!(
      url_file_path(&url),
      std::path::PathBuf::from("/tmp/my captures")
    );
  }

  #[test]
  fn enabled_backends_accept_their_scheme() {
    #[cfg(feature = "model_onnx")]
    assert!(model::ModelWrapper::<224>::from_url(&url::Url::parse("onnx:///m.onnx").unwrap()).is_ok());
    #[cfg(feature = "model_rknn")]
    assert!(model::ModelWrapper::<224>::from_url(&url::Url::parse("rknn:///m.rknn").unwrap()).is_ok());
    #[cfg(feature = "read_image_file")]
    assert!(input::InputWrapper::from_url(&url::Url::parse("image:///frames").unwrap()).is_ok());
    #[cfg(feature = "v4l_input")]
    assert!(input::InputWrapper::from_url(&url::Url::parse("v4l2:///dev/video0").unwrap()).is_ok());
  }
}
