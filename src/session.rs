// 该文件是 Biaozhu （标注） 项目的一部分。
// src/session.rs - 采集会话状态机
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

//! 采集会话：运行时逐帧推理，用户采集后冻结，确认/更正后保存。
//!
//! ```text
//! Idle ──start──▶ Running ──capture──▶ AwaitingConfirmation ──agree──────────────▶ Frozen
//!  ▲                │  ▲                      │                                     │
//!  └─────pause──────┘  │                      └─disagree─▶ AwaitingClassChoice ─choose─┤
//!                      └──────────────────────────────start───────────────────────────┘
//! 任意状态 ──teardown──▶ Stopped
//! ```

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  Build,
  frame::CameraFrame,
  model::{Labels, Model, Prediction},
  output::{Decision, DirectoryStore, OutputError, Persist, SaveRequest, SavedImage, Storage, encode_png},
};

const STATUS_RUNNING: &str = "推理中…";
const STATUS_PAUSED: &str = "已暂停";
const STATUS_AWAITING: &str = "已冻结，等待确认";
const STATUS_FROZEN: &str = "已冻结，重新开始以继续";
const STATUS_STOPPED: &str = "已停止";
const NO_PREDICTION_YET: &str = "还没有预测结果，请稍后重试。";

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("会话已停止")]
  Stopped,
  #[error("当前状态 {state} 不允许操作 {action}")]
  InvalidState {
    action: &'static str,
    state: &'static str,
  },
  #[error("初始化错误: {0}")]
  Init(String),
  #[error("帧处理错误: {0}")]
  Frame(String),
  #[error("还没有预测结果")]
  NoPrediction,
  #[error("快照编码错误: {0}")]
  Snapshot(#[from] image::ImageError),
  #[error("未知标签: {0}")]
  UnknownLabel(String),
  #[error("保存错误: {0}")]
  Save(#[from] OutputError),
  #[error("不是可写目录: {0}")]
  NotADirectory(PathBuf),
}

/// 采集时刻的快照，只会被保存一次
#[derive(Debug, Clone)]
pub struct CapturedArtifact {
  pub image_png: Vec<u8>,
  pub camera_label: String,
  pub camera_confidence: f32,
  pub captured_at: DateTime<Local>,
  pub prediction: Prediction,
}

#[derive(Debug)]
pub enum SessionState {
  Idle,
  Running,
  AwaitingConfirmation(CapturedArtifact),
  AwaitingClassChoice(CapturedArtifact),
  Frozen,
  Stopped,
}

impl SessionState {
  pub fn name(&self) -> &'static str {
    match self {
      SessionState::Idle => "Idle",
      SessionState::Running => "Running",
      SessionState::AwaitingConfirmation(_) => "AwaitingConfirmation",
      SessionState::AwaitingClassChoice(_) => "AwaitingClassChoice",
      SessionState::Frozen => "Frozen",
      SessionState::Stopped => "Stopped",
    }
  }

  pub fn pending(&self) -> Option<&CapturedArtifact> {
    match self {
      SessionState::AwaitingConfirmation(artifact) | SessionState::AwaitingClassChoice(artifact) => {
        Some(artifact)
      }
      _ => None,
    }
  }
}

impl fmt::Display for SessionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// 当前可见的操作
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Controls {
  pub start: bool,
  pub pause: bool,
  pub capture: bool,
  pub confirm: bool,
  pub label_choices: bool,
}

impl Controls {
  /// 确认相关的控件全部隐藏
  pub fn choices_hidden(&self) -> bool {
    !self.confirm && !self.label_choices
  }
}

/// 状态栏，每一行都是最后一次写入生效
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBoard {
  pub status: String,
  pub error: String,
  pub save: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
  /// 保存完成后释放摄像头，重新开始时再获取
  pub release_on_freeze: bool,
}

pub struct CaptureSession<I, M>
where
  I: Build,
  M: Build,
{
  camera_source: I,
  model_source: M,
  camera: Option<I::Target>,
  classifier: Option<M::Target>,
  labels: Labels,
  storage: Storage,
  options: SessionOptions,
  state: SessionState,
  last_frame: Option<CameraFrame>,
  last_prediction: Option<Prediction>,
  status: StatusBoard,
}

impl<I, M, C, K, E, F> CaptureSession<I, M>
where
  I: Build<Target = C>,
  I::Error: fmt::Display,
  C: Iterator<Item = Result<CameraFrame, E>>,
  E: fmt::Display,
  M: Build<Target = K>,
  M::Error: fmt::Display,
  K: Model<Input = CameraFrame, Output = Prediction, Error = F>,
  F: fmt::Display,
{
  pub fn new(camera_source: I, model_source: M, labels: Labels, storage: Storage) -> Self {
    Self {
      camera_source,
      model_source,
      camera: None,
      classifier: None,
      labels,
      storage,
      options: SessionOptions::default(),
      state: SessionState::Idle,
      last_frame: None,
      last_prediction: None,
      status: StatusBoard::default(),
    }
  }

  pub fn with_options(mut self, options: SessionOptions) -> Self {
    self.options = options;
    self
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  pub fn status(&self) -> &StatusBoard {
    &self.status
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn last_prediction(&self) -> Option<&Prediction> {
    self.last_prediction.as_ref()
  }

  pub fn camera_acquired(&self) -> bool {
    self.camera.is_some()
  }

  pub fn classifier_loaded(&self) -> bool {
    self.classifier.is_some()
  }

  pub fn is_running(&self) -> bool {
    matches!(self.state, SessionState::Running)
  }

  pub fn controls(&self) -> Controls {
    match self.state {
      SessionState::Idle | SessionState::Frozen => Controls {
        start: true,
        ..Controls::default()
      },
      SessionState::Running => Controls {
        pause: true,
        capture: true,
        ..Controls::default()
      },
      SessionState::AwaitingConfirmation(_) => Controls {
        confirm: true,
        ..Controls::default()
      },
      SessionState::AwaitingClassChoice(_) => Controls {
        confirm: true,
        label_choices: true,
        ..Controls::default()
      },
      SessionState::Stopped => Controls::default(),
    }
  }

  fn reject(&self, action: &'static str) -> SessionError {
    if matches!(self.state, SessionState::Stopped) {
      return SessionError::Stopped;
    }
    warn!("状态 {} 下忽略操作 {}", self.state, action);
    SessionError::InvalidState {
      action,
      state: self.state.name(),
    }
  }

  /// 获取摄像头与模型（已持有的不重复获取），进入 Running
  pub fn start(&mut self) -> Result<(), SessionError> {
    match self.state {
      SessionState::Running => return Ok(()),
      SessionState::Idle | SessionState::Frozen => {}
      _ => return Err(self.reject("start")),
    }

    self.status.error.clear();

    if self.camera.is_none() {
      match self.camera_source.build() {
        Ok(camera) => self.camera = Some(camera),
        Err(e) => return Err(self.init_failed(e.to_string())),
      }
    }

    if self.classifier.is_none() {
      match self.model_source.build() {
        Ok(classifier) => self.classifier = Some(classifier),
        Err(e) => return Err(self.init_failed(e.to_string())),
      }
    }

    self.state = SessionState::Running;
    self.status.status = STATUS_RUNNING.to_string();
    info!("会话开始运行");
    Ok(())
  }

  fn init_failed(&mut self, message: String) -> SessionError {
    error!("初始化失败: {}", message);
    self.status.error = format!("初始化错误: {}", message);
    SessionError::Init(message)
  }

  /// 一次刷新：只在 Running 时取一帧并推理，失败不会中断会话
  pub fn tick(&mut self) -> Result<Option<&Prediction>, SessionError> {
    if !self.is_running() {
      return Ok(None);
    }

    match self.infer_current_frame() {
      Ok((frame, prediction)) => {
        debug!("第 {} 帧预测完成", frame.index);
        self.last_frame = Some(frame);
        self.last_prediction = Some(prediction);
        Ok(self.last_prediction.as_ref())
      }
      Err(message) => {
        error!("帧处理失败: {}", message);
        self.status.error = message.clone();
        Err(SessionError::Frame(message))
      }
    }
  }

  fn infer_current_frame(&mut self) -> Result<(CameraFrame, Prediction), String> {
    let camera = self.camera.as_mut().ok_or("摄像头未打开")?;
    let frame = match camera.next() {
      Some(Ok(frame)) => frame,
      Some(Err(e)) => return Err(e.to_string()),
      None => return Err("摄像头画面已结束".to_string()),
    };
    let classifier = self.classifier.as_ref().ok_or("模型未加载")?;
    let prediction = classifier.infer(&frame).map_err(|e| e.to_string())?;
    Ok((frame, prediction))
  }

  /// 停止推理循环，保留摄像头与模型
  pub fn pause(&mut self) -> Result<(), SessionError> {
    match self.state {
      SessionState::Idle => Ok(()),
      SessionState::Running => {
        self.state = SessionState::Idle;
        self.status.status = STATUS_PAUSED.to_string();
        info!("会话已暂停");
        Ok(())
      }
      _ => Err(self.reject("pause")),
    }
  }

  /// 冻结最近一帧及其判断，等待用户确认
  pub fn capture(&mut self) -> Result<&CapturedArtifact, SessionError> {
    if !self.is_running() {
      return Err(self.reject("capture"));
    }

    self.status.save.clear();
    let (Some(frame), Some(prediction)) = (&self.last_frame, &self.last_prediction) else {
      self.status.save = NO_PREDICTION_YET.to_string();
      return Err(SessionError::NoPrediction);
    };
    let Some(best) = prediction.best() else {
      self.status.save = NO_PREDICTION_YET.to_string();
      return Err(SessionError::NoPrediction);
    };

    let image_png = match encode_png(&frame.image) {
      Ok(bytes) => bytes,
      Err(e) => {
        self.status.save = format!("Save error: {}", e);
        return Err(SessionError::Snapshot(e));
      }
    };

    let artifact = CapturedArtifact {
      image_png,
      camera_label: best.label.clone(),
      camera_confidence: best.score,
      captured_at: Local::now(),
      prediction: prediction.clone(),
    };
    info!(
      "采集第 {} 帧: {} ({:.1}%)",
      frame.index,
      artifact.camera_label,
      artifact.camera_confidence * 100.0
    );

    self.state = SessionState::AwaitingConfirmation(artifact);
    self.status.status = STATUS_AWAITING.to_string();
    self.state.pending().ok_or(SessionError::NoPrediction)
  }

  /// 同意模型判断，保存到 `Agree/<模型判断>`
  pub fn agree(&mut self) -> Result<SavedImage, SessionError> {
    let artifact = match std::mem::replace(&mut self.state, SessionState::Frozen) {
      SessionState::AwaitingConfirmation(artifact) | SessionState::AwaitingClassChoice(artifact) => {
        artifact
      }
      other => {
        self.state = other;
        return Err(self.reject("agree"));
      }
    };
    let label = artifact.camera_label.clone();
    self.resolve(Decision::Agree, &label, artifact)
  }

  /// 不同意，展开标签选择
  pub fn disagree(&mut self) -> Result<(), SessionError> {
    match std::mem::replace(&mut self.state, SessionState::Frozen) {
      SessionState::AwaitingConfirmation(artifact) | SessionState::AwaitingClassChoice(artifact) => {
        self.state = SessionState::AwaitingClassChoice(artifact);
        Ok(())
      }
      other => {
        self.state = other;
        Err(self.reject("disagree"))
      }
    }
  }

  /// 选择正确标签，保存到 `Disagree/<所选标签>`，文件名保留模型判断
  pub fn choose(&mut self, label: &str) -> Result<SavedImage, SessionError> {
    if !matches!(self.state, SessionState::AwaitingClassChoice(_)) {
      return Err(self.reject("choose"));
    }
    let Some(index) = self.labels.position(label) else {
      return Err(SessionError::UnknownLabel(label.to_string()));
    };
    let chosen = self.labels.get(index).unwrap_or(label).to_string();

    let artifact = match std::mem::replace(&mut self.state, SessionState::Frozen) {
      SessionState::AwaitingClassChoice(artifact) => artifact,
      other => {
        self.state = other;
        return Err(self.reject("choose"));
      }
    };
    self.resolve(Decision::Disagree, &chosen, artifact)
  }

  /// 按序号选择标签（从 0 开始，错误信息中按 1 开始显示）
  pub fn choose_index(&mut self, index: usize) -> Result<SavedImage, SessionError> {
    match self.labels.get(index).map(str::to_string) {
      Some(label) => self.choose(&label),
      None => Err(SessionError::UnknownLabel((index + 1).to_string())),
    }
  }

  /// 消费待确认快照。无论成功与否都以 Frozen 结束，确认控件随之隐藏
  fn resolve(
    &mut self,
    decision: Decision,
    chosen_label: &str,
    artifact: CapturedArtifact,
  ) -> Result<SavedImage, SessionError> {
    let request = SaveRequest {
      decision,
      chosen_label,
      camera_label: &artifact.camera_label,
      camera_confidence: artifact.camera_confidence,
      date: artifact.captured_at.date_naive(),
      image_png: &artifact.image_png,
      prediction: Some(&artifact.prediction),
    };

    let result = self.storage.save(&request);
    self.enter_frozen();

    match result {
      Ok(saved) => {
        info!("{}", saved);
        self.status.save = saved.to_string();
        Ok(saved)
      }
      Err(e) => {
        error!("保存失败: {}", e);
        self.status.save = format!("Save error: {}", e);
        Err(SessionError::Save(e))
      }
    }
  }

  fn enter_frozen(&mut self) {
    self.state = SessionState::Frozen;
    self.status.status = STATUS_FROZEN.to_string();
    // 已保存的帧不能再次采集，重新开始后等待新的预测
    self.last_frame = None;
    self.last_prediction = None;
    if self.options.release_on_freeze {
      self.release_camera();
    }
  }

  /// 授权基础目录，此后保存写入目录结构
  pub fn grant_base_directory(&mut self, store: DirectoryStore) -> Result<(), SessionError> {
    if matches!(self.state, SessionState::Stopped) {
      return Err(SessionError::Stopped);
    }
    if !store.root().is_dir() {
      self.status.save = format!("Not a directory: {}", store.root().display());
      return Err(SessionError::NotADirectory(store.root().to_path_buf()));
    }
    self.status.save = format!(
      "Save folder selected: {}. Files will be written there.",
      store.root().display()
    );
    self.storage.grant(store);
    Ok(())
  }

  pub fn base_directory(&self) -> Option<&std::path::Path> {
    self.storage.base_directory()
  }

  /// 释放摄像头；运行中不允许
  pub fn release_camera(&mut self) {
    if self.is_running() {
      warn!("运行中不释放摄像头");
      return;
    }
    if self.camera.take().is_some() {
      info!("摄像头已释放");
    }
  }

  /// 结束会话并释放全部资源，之后的操作都会被拒绝
  pub fn teardown(&mut self) {
    if matches!(self.state, SessionState::Stopped) {
      return;
    }
    if let Some(artifact) = self.state.pending() {
      warn!("丢弃未保存的采集: {}", artifact.camera_label);
    }
    self.state = SessionState::Stopped;
    self.camera = None;
    self.classifier = None;
    self.last_frame = None;
    self.last_prediction = None;
    self.status.status = STATUS_STOPPED.to_string();
    info!("会话已结束，资源已释放");
  }
}
