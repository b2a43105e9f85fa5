// 该文件是 Biaozhu （标注） 项目的一部分。
// src/frame.rs - 摄像头帧与 NHWC 张量帧定义
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 摄像头帧
#[derive(Debug, Clone)]
pub struct CameraFrame {
  /// RGB 图像数据（原始分辨率）
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒，相对于摄像头打开时刻）
  pub timestamp_ms: u64,
}

impl CameraFrame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }
}

/// 最近邻缩放，采样点为 floor(dst * src / dst_size)，不做半像素对齐
fn nearest_source_index(dst: u32, src_size: u32, dst_size: u32) -> u32 {
  let index = (dst as u64 * src_size as u64) / dst_size as u64;
  (index as u32).min(src_size.saturating_sub(1))
}

fn for_each_nearest_pixel<const W: u32, const H: u32>(
  image: &RgbImage,
  mut f: impl FnMut(usize, &[u8; 3]),
) {
  let (src_w, src_h) = image.dimensions();
  if src_w == 0 || src_h == 0 {
    return;
  }
  for h in 0..H {
    let sy = nearest_source_index(h, src_h, H);
    for w in 0..W {
      let sx = nearest_source_index(w, src_w, W);
      let pixel = image.get_pixel(sx, sy);
      let index = (h as usize * W as usize + w as usize) * RGB_CHANNELS;
      f(index, &pixel.0);
    }
  }
}

/// u8 NHWC 帧，供在模型内部完成归一化的后端（RKNN）使用
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0u8; size].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> From<&RgbImage> for RgbNhwcFrame<W, H> {
  fn from(image: &RgbImage) -> Self {
    let mut frame = Self::default();
    let slice = &mut frame.data;
    for_each_nearest_pixel::<W, H>(image, |index, pixel| {
      slice[index..index + RGB_CHANNELS].copy_from_slice(pixel);
    });
    frame
  }
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 归一化到 [0, 1] 的 f32 NHWC 帧，形状为 `[1, H, W, 3]`
#[derive(Debug, Clone)]
pub struct NormalizedNhwcFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for NormalizedNhwcFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0f32; size].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> From<&RgbImage> for NormalizedNhwcFrame<W, H> {
  fn from(image: &RgbImage) -> Self {
    let mut frame = Self::default();
    let slice = &mut frame.data;
    for_each_nearest_pixel::<W, H>(image, |index, pixel| {
      for (c, value) in pixel.iter().enumerate() {
        slice[index + c] = *value as f32 / 255.0;
      }
    });
    frame
  }
}

impl<const W: u32, const H: u32> NormalizedNhwcFrame<W, H> {
  /// 带单批次维度的形状
  pub fn shape(&self) -> [usize; 4] {
    [1, H as usize, W as usize, RGB_CHANNELS]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}
