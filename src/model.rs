// 该文件是 Biaozhu （标注） 项目的一部分。
// src/model.rs - 分类模型
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{Build, FromUrl, frame::CameraFrame};

/// 默认分类标签
pub const DEFAULT_LABELS: [&str; 3] = ["Big Lot", "C Press", "Snyders"];

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
  #[error("标签列表为空")]
  Empty,
  #[error("标签为空字符串")]
  Blank,
  #[error("标签重复: {0}")]
  Duplicate(String),
  #[error("标签不能包含路径分隔符: {0}")]
  PathSeparator(String),
}

/// 固定且有序的标签集合，标签同时用作保存目录名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Box<[String]>,
}

impl Default for Labels {
  fn default() -> Self {
    Self {
      names: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl Labels {
  pub fn new<I, S>(names: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names = names
      .into_iter()
      .map(|s| s.into().trim().to_string())
      .collect::<Vec<_>>();
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    for (i, name) in names.iter().enumerate() {
      if name.is_empty() {
        return Err(LabelError::Blank);
      }
      if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(LabelError::PathSeparator(name.clone()));
      }
      if names[..i].contains(name) {
        return Err(LabelError::Duplicate(name.clone()));
      }
    }
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  /// 解析逗号分隔的标签列表
  pub fn parse(list: &str) -> Result<Self, LabelError> {
    Self::new(list.split(','))
  }

  /// 从 URL 查询参数 `labels=` 读取，缺省为 [`DEFAULT_LABELS`]
  pub fn from_query(url: &Url) -> Result<Self, LabelError> {
    match url.query_pairs().find(|(k, _)| k == "labels") {
      Some((_, v)) => Self::parse(&v),
      None => Ok(Self::default()),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.names.iter().position(|n| n == name)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
  pub label: String,
  pub score: f32,
}

/// 每帧的分类结果，按标签顺序排列，不做归一化
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub items: Box<[ClassScore]>,
}

/// 第一个严格大于之前所有值的下标；相等时保留靠前者，NaN 不参与比较
pub fn best_index(scores: &[f32]) -> usize {
  let mut best_idx = 0;
  let mut best_val = f32::NEG_INFINITY;
  for (i, &score) in scores.iter().enumerate() {
    if score > best_val {
      best_val = score;
      best_idx = i;
    }
  }
  best_idx
}

impl Prediction {
  /// 按标签数对齐：缺失的分数记为 0，多余的分数忽略
  pub fn from_scores(labels: &Labels, scores: &[f32]) -> Self {
    if scores.len() != labels.len() {
      warn!(
        "模型输出数量 {} 与标签数量 {} 不一致",
        scores.len(),
        labels.len()
      );
    }
    let items = labels
      .iter()
      .enumerate()
      .map(|(i, label)| ClassScore {
        label: label.to_string(),
        score: scores.get(i).copied().unwrap_or(0.0),
      })
      .collect();
    Self { items }
  }

  pub fn scores(&self) -> Vec<f32> {
    self.items.iter().map(|item| item.score).collect()
  }

  pub fn best_index(&self) -> usize {
    best_index(&self.scores())
  }

  pub fn best(&self) -> Option<&ClassScore> {
    self.items.get(self.best_index())
  }
}

impl fmt::Display for Prediction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let best = self.best_index();
    for (i, item) in self.items.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      let marker = if i == best { '>' } else { ' ' };
      write!(f, "{} {}: {:.2}%", marker, item.label, item.score * 100.0)?;
    }
    Ok(())
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder, OnnxClassifierError};

#[cfg(feature = "model_rknn")]
mod rknn;
#[cfg(feature = "model_rknn")]
pub use self::rknn::{RknnClassifier, RknnClassifierBuilder, RknnClassifierError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxClassifierError(#[from] OnnxClassifierError),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 模型错误: {0}")]
  RknnClassifierError(#[from] RknnClassifierError),
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 分类模型配置，`S` 为输入的正方形边长
#[derive(Debug, Clone)]
pub enum ModelWrapper<const S: u32> {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxClassifierBuilder<S>),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnClassifierBuilder<S>),
}

impl<const S: u32> FromUrl for ModelWrapper<S> {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "model_onnx")]
      scheme if scheme == <OnnxClassifierBuilder<S> as crate::FromUrlWithScheme>::SCHEME => {
        Ok(ModelWrapper::Onnx(OnnxClassifierBuilder::from_url(url)?))
      }
      #[cfg(feature = "model_rknn")]
      scheme if scheme == <RknnClassifierBuilder<S> as crate::FromUrlWithScheme>::SCHEME => {
        Ok(ModelWrapper::Rknn(RknnClassifierBuilder::from_url(url)?))
      }
      scheme => Err(ModelError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl<const S: u32> ModelWrapper<S> {
  pub fn labels(&self) -> &Labels {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(builder) => builder.labels(),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(builder) => builder.labels(),
    }
  }
}

impl<const S: u32> Build for ModelWrapper<S> {
  type Target = Classifier<S>;
  type Error = ModelError;

  fn build(&self) -> Result<Self::Target, Self::Error> {
    info!("加载分类模型");
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(builder) => Ok(Classifier::Onnx(builder.build()?)),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(builder) => Ok(Classifier::Rknn(builder.build()?)),
    }
  }
}

/// 已加载的分类模型，drop 即释放推理资源
pub enum Classifier<const S: u32> {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxClassifier<S>),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnClassifier<S>),
}

impl<const S: u32> Model for Classifier<S> {
  type Input = CameraFrame;
  type Output = Prediction;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_onnx")]
      Classifier::Onnx(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "model_rknn")]
      Classifier::Rknn(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn best_index_picks_strict_maximum() {
    assert_eq!(best_index(&[0.1, 0.7, 0.2]), 1);
    assert_eq!(best_index(&[0.9, 0.05, 0.05]), 0);
  }

  #[test]
  fn best_index_ties_resolve_to_earliest() {
    assert_eq!(best_index(&[0.2, 0.4, 0.4]), 1);
    assert_eq!(best_index(&[0.5, 0.5, 0.5]), 0);
  }

  #[test]
  fn best_index_skips_nan() {
    assert_eq!(best_index(&[f32::NAN, 0.1, 0.3]), 2);
    assert_eq!(best_index(&[f32::NAN, f32::NAN]), 0);
    assert_eq!(best_index(&[]), 0);
  }

  #[test]
  fn prediction_pads_missing_scores_with_zero() {
    let labels = Labels::default();
    let prediction = Prediction::from_scores(&labels, &[0.25]);
    assert_eq!(prediction.scores(), vec![0.25, 0.0, 0.0]);

    let prediction = Prediction::from_scores(&labels, &[0.1, 0.2, 0.3, 0.9]);
    assert_eq!(prediction.items.len(), 3);
    assert_eq!(prediction.best().unwrap().label, "Snyders");
  }

  #[test]
  fn prediction_is_not_renormalized() {
    let labels = Labels::default();
    let prediction = Prediction::from_scores(&labels, &[0.6, 0.6, 0.6]);
    assert_eq!(prediction.best().unwrap().score, 0.6);
    assert_eq!(prediction.best().unwrap().label, "Big Lot");
  }

  #[test]
  fn prediction_display_marks_best_row() {
    let labels = Labels::default();
    let prediction = Prediction::from_scores(&labels, &[0.1, 0.8, 0.1]);
    let text = prediction.to_string();
    assert_eq!(
      text,
      "  Big Lot: 10.00%\n> C Press: 80.00%\n  Snyders: 10.00%"
    );
  }

  #[test]
  fn labels_reject_invalid_names() {
    assert_eq!(Labels::parse(""), Err(LabelError::Blank));
    assert_eq!(
      Labels::parse("a,b,a"),
      Err(LabelError::Duplicate("a".to_string()))
    );
    assert_eq!(
      Labels::parse("ok,../up"),
      Err(LabelError::PathSeparator("../up".to_string()))
    );
    assert_eq!(Labels::new(Vec::<String>::new()), Err(LabelError::Empty));
  }

  #[test]
  fn labels_from_query() {
    let url = Url::parse("onnx:///m.onnx?labels=Cat,Dog+Bowl").unwrap();
    let labels = Labels::from_query(&url).unwrap();
    assert_eq!(labels.iter().collect::<Vec<_>>(), vec!["Cat", "Dog Bowl"]);
    assert_eq!(labels.position("Dog Bowl"), Some(1));

    let url = Url::parse("onnx:///m.onnx").unwrap();
    assert_eq!(Labels::from_query(&url).unwrap(), Labels::default());
  }

  #[test]
  fn unknown_model_scheme_is_rejected() {
    let url = Url::parse("tfjs:///model.json").unwrap();
    assert!(matches!(
      ModelWrapper::<224>::from_url(&url),
      Err(ModelError::SchemeMismatch(ref s)) if s == "tfjs"
    ));
  }
}
