// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model/rknn.rs - RKNN 分类模型
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

//! RKNN 后端。转换模型时需把 1/255 归一化写入模型配置，
//! 这里直接输入 u8 NHWC 数据。

use std::path::PathBuf;

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  Build, FromUrl, FromUrlWithScheme,
  frame::{CameraFrame, RgbNhwcFrame},
  model::{LabelError, Labels, Model, Prediction},
  url_file_path,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknnClassifierError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
}

impl From<std::io::Error> for RknnClassifierError {
  fn from(err: std::io::Error) -> Self {
    RknnClassifierError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnClassifierError {
  fn from(err: rknpu::Error) -> Self {
    RknnClassifierError::RknnError(err)
  }
}

impl RknnClassifierError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnClassifierError::ModelInvalid(msg.to_string(), e)
  }
}

/// `rknn:///path/model.rknn?labels=...`
#[derive(Debug, Clone)]
pub struct RknnClassifierBuilder<const S: u32> {
  model_path: PathBuf,
  labels: Labels,
}

impl<const S: u32> FromUrlWithScheme for RknnClassifierBuilder<S> {
  const SCHEME: &'static str = "rknn";
}

impl<const S: u32> FromUrl for RknnClassifierBuilder<S> {
  type Error = RknnClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnClassifierError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(RknnClassifierBuilder {
      model_path: url_file_path(url),
      labels: Labels::from_query(url)?,
    })
  }
}

impl<const S: u32> RknnClassifierBuilder<S> {
  pub fn labels(&self) -> &Labels {
    &self.labels
  }
}

impl<const S: u32> Build for RknnClassifierBuilder<S> {
  type Target = RknnClassifier<S>;
  type Error = RknnClassifierError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnClassifierError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnClassifierError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(RknnClassifierError::invalid(
        &format!(
          "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
          RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    let classifier = RknnClassifier {
      context,
      labels: self.labels.clone(),
    };

    let warmup = classifier.run(&RgbNhwcFrame::<S, S>::default())?;
    debug!("预热输出长度: {}", warmup.len());
    info!("模型加载完成");

    Ok(classifier)
  }
}

pub struct RknnClassifier<const S: u32> {
  context: Context,
  labels: Labels,
}

impl<const S: u32> RknnClassifier<S> {
  fn run(&self, frame: &RgbNhwcFrame<S, S>) -> Result<Vec<f32>, RknnClassifierError> {
    self.context.set_input(
      0,
      frame.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    self.context.run()?;
    let output = self.context.get_outputs()?;
    let scores = output.get_f32(0)?.iter().copied().collect();
    Ok(scores)
  }
}

impl<const S: u32> Model for RknnClassifier<S> {
  type Input = CameraFrame;
  type Output = Prediction;
  type Error = RknnClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = RgbNhwcFrame::<S, S>::from(&input.image);
    let scores = self.run(&frame)?;
    debug!("第 {} 帧模型输出: {:?}", input.index, scores);
    Ok(Prediction::from_scores(&self.labels, &scores))
  }
}
