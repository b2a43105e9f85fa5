// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model/onnx.rs - ONNX 分类模型（tract 推理）
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
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  Build, FromUrl, FromUrlWithScheme,
  frame::{CameraFrame, NormalizedNhwcFrame},
  model::{LabelError, Labels, Model, Prediction},
  url_file_path,
};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum OnnxClassifierError {
  #[error("模型路径方案错误: {0}")]
  SchemeMismatch(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("tract 错误: {0}")]
  Tract(String),
  #[error("标签错误: {0}")]
  Label(#[from] LabelError),
  #[error("模型没有输出")]
  NoOutput,
}

impl From<TractError> for OnnxClassifierError {
  fn from(err: TractError) -> Self {
    OnnxClassifierError::Tract(err.to_string())
  }
}

/// `onnx:///path/model.onnx?labels=Big Lot,C Press,Snyders`
#[derive(Debug, Clone)]
pub struct OnnxClassifierBuilder<const S: u32> {
  model_path: PathBuf,
  labels: Labels,
}

impl<const S: u32> FromUrlWithScheme for OnnxClassifierBuilder<S> {
  const SCHEME: &'static str = "onnx";
}

impl<const S: u32> FromUrl for OnnxClassifierBuilder<S> {
  type Error = OnnxClassifierError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxClassifierError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(OnnxClassifierBuilder {
      model_path: url_file_path(url),
      labels: Labels::from_query(url)?,
    })
  }
}

impl<const S: u32> OnnxClassifierBuilder<S> {
  pub fn labels(&self) -> &Labels {
    &self.labels
  }
}

impl<const S: u32> Build for OnnxClassifierBuilder<S> {
  type Target = OnnxClassifier<S>;
  type Error = OnnxClassifierError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    if !self.model_path.is_file() {
      return Err(OnnxClassifierError::ModelNotFound(self.model_path.clone()));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let side = S as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(0, f32::fact([1, side, side, 3]).into())?
      .into_optimized()?
      .into_runnable()?;

    let classifier = OnnxClassifier {
      plan,
      labels: self.labels.clone(),
    };

    // 预热：首帧不再承担图初始化开销
    let warmup = classifier.run(&NormalizedNhwcFrame::<S, S>::default())?;
    debug!("预热输出长度: {}", warmup.len());
    info!("模型加载完成");

    Ok(classifier)
  }
}

pub struct OnnxClassifier<const S: u32> {
  plan: OnnxPlan,
  labels: Labels,
}

impl<const S: u32> OnnxClassifier<S> {
  fn run(&self, frame: &NormalizedNhwcFrame<S, S>) -> Result<Vec<f32>, OnnxClassifierError> {
    let tensor = Tensor::from_shape(&frame.shape(), frame.as_slice())?;
    let outputs = self.plan.run(tvec!(tensor.into_tvalue()))?;
    let output = outputs.first().ok_or(OnnxClassifierError::NoOutput)?;
    let scores = output.to_array_view::<f32>()?.iter().copied().collect();
    Ok(scores)
  }
}

impl<const S: u32> Model for OnnxClassifier<S> {
  type Input = CameraFrame;
  type Output = Prediction;
  type Error = OnnxClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let frame = NormalizedNhwcFrame::<S, S>::from(&input.image);
    let scores = self.run(&frame)?;
    debug!("第 {} 帧模型输出: {:?}", input.index, scores);
    Ok(Prediction::from_scores(&self.labels, &scores))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_carries_path_and_labels() {
    let url = Url::parse("onnx:///models/snack%20v2.onnx?labels=A,B").unwrap();
    let builder = OnnxClassifierBuilder::<224>::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/snack v2.onnx"));
    assert_eq!(builder.labels().len(), 2);
  }

  #[test]
  fn missing_model_is_an_init_error() {
    let url = Url::parse("onnx:///definitely/missing.onnx").unwrap();
    let builder = OnnxClassifierBuilder::<224>::from_url(&url).unwrap();
    assert!(matches!(
      builder.build(),
      Err(OnnxClassifierError::ModelNotFound(_))
    ));
  }
}
