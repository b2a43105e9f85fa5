// 该文件是 Biaozhu （标注） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入
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
use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{Build, FromUrl, FromUrlWithScheme, frame::CameraFrame, url_file_path};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2CameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开设备 {0}: {1}")]
  OpenDevice(PathBuf, std::io::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的查询参数 {0}={1}")]
  InvalidQuery(String, String),
  #[error("设备不支持 YUYV 格式，实际为 {0}")]
  UnsupportedPixelFormat(String),
  #[error("无法创建 RGB 图像")]
  ImageBuffer,
}

/// V4L2 摄像头配置，例如 `v4l2:///dev/video0?width=640&height=480`
#[derive(Debug, Clone)]
pub struct V4l2CameraInput {
  device_path: PathBuf,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4l2CameraInput {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2CameraInput {
  type Error = V4l2CameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2CameraError::SchemeMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      PathBuf::from(DEFAULT_DEVICE)
    } else {
      url_file_path(url)
    };

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (k, v) in url.query_pairs() {
      let parsed = || {
        v.parse::<u32>()
          .map_err(|_| V4l2CameraError::InvalidQuery(k.to_string(), v.to_string()))
      };
      match k.as_ref() {
        "width" => width = parsed()?,
        "height" => height = parsed()?,
        _ => {}
      }
    }

    Ok(V4l2CameraInput {
      device_path,
      width,
      height,
    })
  }
}

impl Build for V4l2CameraInput {
  type Target = V4l2Camera;
  type Error = V4l2CameraError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    V4l2Camera::open(&self.device_path, self.width, self.height)
  }
}

/// 已打开的 V4L2 摄像头
///
/// v4l 的 Stream 需要引用 Device，这里用 Pin<Box<Device>> 固定设备地址，
/// Stream 在 Drop 中先于 Device 释放。
pub struct V4l2Camera {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl V4l2Camera {
  pub fn open(device_path: &std::path::Path, width: u32, height: u32) -> Result<Self, V4l2CameraError> {
    info!("打开摄像头: {}", device_path.display());
    let device = Box::pin(
      Device::with_path(device_path)
        .map_err(|e| V4l2CameraError::OpenDevice(device_path.to_path_buf(), e))?,
    );

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4l2CameraError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }
    info!("摄像头格式: {}x{} YUYV", format.width, format.height);

    let mut camera = Self {
      device,
      stream: None,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；stream 与 device 同属一个结构体，
    // 且在 Drop 中先被取出释放，因此引用在 stream 存活期间始终有效
    let device_ref: &Device = &camera.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)?
    };
    camera.stream = Some(stream);
    Ok(camera)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

/// YUYV (4:2:2) 转 RGB24
pub(crate) fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4l2Camera {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
    info!("摄像头已释放");
  }
}

impl Iterator for V4l2Camera {
  type Item = Result<CameraFrame, V4l2CameraError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer,
      Err(e) => return Some(Err(V4l2CameraError::IoError(e))),
    };

    let rgb = yuyv_to_rgb(buffer, self.width, self.height);
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb) else {
      return Some(Err(V4l2CameraError::ImageBuffer));
    };

    let frame = CameraFrame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_defaults_to_first_device() {
    let input = V4l2CameraInput::from_url(&Url::parse("v4l2://").unwrap()).unwrap();
    assert_eq!(input.device_path, PathBuf::from(DEFAULT_DEVICE));
    assert_eq!((input.width, input.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
  }

  #[test]
  fn url_query_sets_resolution() {
    let url = Url::parse("v4l2:///dev/video2?width=1280&height=720").unwrap();
    let input = V4l2CameraInput::from_url(&url).unwrap();
    assert_eq!(input.device_path, PathBuf::from("/dev/video2"));
    assert_eq!((input.width, input.height), (1280, 720));
  }

  #[test]
  fn invalid_resolution_is_rejected() {
    let url = Url::parse("v4l2:///dev/video0?width=wide").unwrap();
    assert!(matches!(
      V4l2CameraInput::from_url(&url),
      Err(V4l2CameraError::InvalidQuery(_, _))
    ));
  }

  #[test]
  fn yuyv_gray_converts_to_gray() {
    let rgb = yuyv_to_rgb(&[128, 128, 64, 128], 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64]);
  }
}
