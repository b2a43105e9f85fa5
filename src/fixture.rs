// 该文件是 Biaozhu （标注） 项目的一部分。
// src/fixture.rs - 测试用摄像头与模型
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

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use image::{Rgb, RgbImage};

use crate::{
  Build,
  frame::CameraFrame,
  model::{Labels, Model, Prediction},
};

#[derive(Clone, Default)]
pub struct FakeCameraSource {
  pub opened: Rc<Cell<usize>>,
  pub fail_open: bool,
  pub drop_frames: Rc<Cell<bool>>,
}

pub struct FakeCamera {
  index: u64,
  drop_frames: Rc<Cell<bool>>,
}

impl Build for FakeCameraSource {
  type Target = FakeCamera;
  type Error = String;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    if self.fail_open {
      return Err("permission denied".to_string());
    }
    self.opened.set(self.opened.get() + 1);
    Ok(FakeCamera {
      index: 0,
      drop_frames: self.drop_frames.clone(),
    })
  }
}

impl Iterator for FakeCamera {
  type Item = Result<CameraFrame, String>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.drop_frames.get() {
      return Some(Err("frame dropped".to_string()));
    }
    let image = RgbImage::from_pixel(4, 4, Rgb([self.index as u8, 0, 0]));
    let frame = CameraFrame::new(image, self.index, self.index * 33);
    self.index += 1;
    Some(Ok(frame))
  }
}

#[derive(Clone)]
pub struct FakeModelSource {
  pub loaded: Rc<Cell<usize>>,
  pub scores: Rc<RefCell<Vec<f32>>>,
  pub fail_infer: Rc<Cell<bool>>,
}

impl Default for FakeModelSource {
  fn default() -> Self {
    Self {
      loaded: Rc::default(),
      scores: Rc::new(RefCell::new(vec![0.05, 0.077, 0.873])),
      fail_infer: Rc::default(),
    }
  }
}

pub struct FakeModel {
  labels: Labels,
  scores: Rc<RefCell<Vec<f32>>>,
  fail_infer: Rc<Cell<bool>>,
}

impl Build for FakeModelSource {
  type Target = FakeModel;
  type Error = String;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    self.loaded.set(self.loaded.get() + 1);
    Ok(FakeModel {
      labels: Labels::default(),
      scores: self.scores.clone(),
      fail_infer: self.fail_infer.clone(),
    })
  }
}

impl Model for FakeModel {
  type Input = CameraFrame;
  type Output = Prediction;
  type Error = String;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    if self.fail_infer.get() {
      return Err("tensor shape mismatch".to_string());
    }
    Ok(Prediction::from_scores(&self.labels, &self.scores.borrow()))
  }
}
