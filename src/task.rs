// 该文件是 Biaozhu （标注） 项目的一部分。
// src/task.rs - 采集任务循环与命令解析
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
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use std::thread;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  Build,
  frame::CameraFrame,
  model::{Labels, Model, Prediction},
  output::{DirectoryStore, Storage, confidence_percent},
  session::{CaptureSession, SessionError, SessionOptions},
};

pub const HELP: &str = "\
命令:
  start              开始/恢复推理
  pause              暂停推理
  capture | c        采集当前画面
  agree | a          同意模型判断并保存
  disagree | d       不同意，选择正确标签
  choose <序号|标签>  选择正确标签并保存（也可直接输入序号）
  folder <路径>       选择保存目录
  release            释放摄像头
  status             显示状态
  help               显示帮助
  quit | q           退出";

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelChoice {
  /// 从 0 开始的标签序号
  Index(usize),
  Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Start,
  Pause,
  Capture,
  Agree,
  Disagree,
  Choose(LabelChoice),
  Folder(PathBuf),
  Release,
  Status,
  Help,
  Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
  #[error("空命令")]
  Empty,
  #[error("未知命令: {0}")]
  Unknown(String),
  #[error("命令 {0} 缺少参数")]
  MissingArgument(&'static str),
  #[error("标签序号从 1 开始: {0}")]
  InvalidIndex(String),
}

fn parse_choice(arg: &str) -> Result<LabelChoice, CommandError> {
  match arg.parse::<usize>() {
    Ok(0) => Err(CommandError::InvalidIndex(arg.to_string())),
    Ok(n) => Ok(LabelChoice::Index(n - 1)),
    Err(_) => Ok(LabelChoice::Name(arg.to_string())),
  }
}

impl FromStr for Command {
  type Err = CommandError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let line = line.trim();
    if line.is_empty() {
      return Err(CommandError::Empty);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
      Some((word, rest)) => (word, rest.trim()),
      None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
      "start" => Ok(Command::Start),
      "pause" | "stop" => Ok(Command::Pause),
      "capture" | "c" => Ok(Command::Capture),
      "agree" | "a" => Ok(Command::Agree),
      "disagree" | "d" => Ok(Command::Disagree),
      "choose" => {
        if rest.is_empty() {
          return Err(CommandError::MissingArgument("choose"));
        }
        Ok(Command::Choose(parse_choice(rest)?))
      }
      "folder" => {
        if rest.is_empty() {
          return Err(CommandError::MissingArgument("folder"));
        }
        Ok(Command::Folder(PathBuf::from(rest)))
      }
      "release" => Ok(Command::Release),
      "status" => Ok(Command::Status),
      "help" | "?" => Ok(Command::Help),
      "quit" | "q" | "exit" => Ok(Command::Quit),
      _ if rest.is_empty() && word.chars().all(|c| c.is_ascii_digit()) => {
        Ok(Command::Choose(parse_choice(word)?))
      }
      _ => Err(CommandError::Unknown(word.to_string())),
    }
  }
}

/// 逐行解析命令并发送；输入结束或读取失败时发送 `Quit`
pub fn read_commands<R: BufRead>(reader: R, tx: &Sender<Command>) {
  for line in reader.lines() {
    let line = match line {
      Ok(line) => line,
      Err(e) => {
        warn!("读取命令失败: {}", e);
        break;
      }
    };
    match line.parse::<Command>() {
      Ok(command) => {
        if tx.send(command).is_err() {
          return;
        }
      }
      Err(CommandError::Empty) => {}
      Err(e) => println!("{}，输入 help 查看命令", e),
    }
  }
  debug!("命令输入已关闭");
  let _ = tx.send(Command::Quit);
}

/// 从标准输入读取命令
pub fn spawn_stdin_reader(tx: Sender<Command>) -> thread::JoinHandle<()> {
  thread::spawn(move || read_commands(std::io::stdin().lock(), &tx))
}

/// 只推理一帧并输出结果
pub struct OneShotTask;

impl<I, M, O, C, K, E, F> Task<I, M, O> for OneShotTask
where
  I: Build<Target = C>,
  I::Error: fmt::Display,
  C: Iterator<Item = Result<CameraFrame, E>>,
  E: fmt::Display,
  M: Build<Target = K>,
  M::Error: fmt::Display,
  K: Model<Input = CameraFrame, Output = Prediction, Error = F>,
  F: fmt::Display,
  O: std::io::Write,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut camera = input.build().map_err(|e| anyhow!("初始化错误: {}", e))?;
    let classifier = model.build().map_err(|e| anyhow!("初始化错误: {}", e))?;

    let frame = camera
      .next()
      .ok_or_else(|| anyhow!("没有输入帧"))?
      .map_err(|e| anyhow!("帧处理错误: {}", e))?;
    info!("输入帧获取成功，开始推理...");

    let now = Instant::now();
    let prediction = classifier.infer(&frame).map_err(|e| anyhow!("推理错误: {}", e))?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    writeln!(output, "{}", prediction)?;
    Ok(())
  }
}

enum Flow {
  Continue,
  Quit,
}

/// 交互式采集：按固定帧率推理，命令来自通道（标准输入或 Ctrl-C）
pub struct CaptureTask {
  interval: Duration,
  labels: Labels,
  options: SessionOptions,
  frame_number: Option<usize>,
  handle_interrupt: bool,
  tx: Sender<Command>,
  rx: Receiver<Command>,
}

impl CaptureTask {
  pub fn new(fps: u32) -> Self {
    let (tx, rx) = mpsc::channel();
    Self {
      interval: Duration::from_secs(1) / fps.max(1),
      labels: Labels::default(),
      options: SessionOptions::default(),
      frame_number: None,
      handle_interrupt: false,
      tx,
      rx,
    }
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_options(mut self, options: SessionOptions) -> Self {
    self.options = options;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// Ctrl-C 时结束会话；一个进程只能注册一次
  pub fn with_interrupt_handler(mut self, enable: bool) -> Self {
    self.handle_interrupt = enable;
    self
  }

  pub fn sender(&self) -> Sender<Command> {
    self.tx.clone()
  }
}

fn install_interrupt_handler(tx: Sender<Command>) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(Command::Quit);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

fn print_outcome<T>(result: Result<T, SessionError>, on_ok: impl FnOnce(T)) {
  match result {
    Ok(value) => on_ok(value),
    Err(e) => println!("{}", e),
  }
}

fn print_label_menu(labels: &Labels) {
  println!("请选择正确的标签:");
  for (i, label) in labels.iter().enumerate() {
    println!("  {}) {}", i + 1, label);
  }
}

fn print_status<I, M, C, K, E, F>(session: &CaptureSession<I, M>)
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
  let board = session.status();
  println!("状态: {} {}", session.state(), board.status);
  if !board.error.is_empty() {
    println!("错误: {}", board.error);
  }
  if !board.save.is_empty() {
    println!("{}", board.save);
  }
  match session.base_directory() {
    Some(dir) => println!("保存目录: {}", dir.display()),
    None => println!("保存目录: 未选择（保存到下载目录）"),
  }
  if let Some(prediction) = session.last_prediction() {
    println!("{}", prediction);
  }
  let controls = session.controls();
  let mut available = Vec::new();
  if controls.start {
    available.push("start");
  }
  if controls.pause {
    available.push("pause");
  }
  if controls.capture {
    available.push("capture");
  }
  if controls.confirm {
    available.push("agree");
    available.push("disagree");
  }
  if controls.label_choices {
    available.push("choose");
  }
  println!("可用操作: {}", available.join(", "));
}

fn handle_command<I, M, C, K, E, F>(session: &mut CaptureSession<I, M>, command: Command) -> Flow
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
  debug!("处理命令: {:?}", command);
  match command {
    Command::Start => print_outcome(session.start(), |_| println!("推理中…")),
    Command::Pause => print_outcome(session.pause(), |_| println!("已暂停")),
    Command::Capture => print_outcome(session.capture(), |artifact| {
      println!(
        "模型判断: {} ({}%)，输入 agree/a 确认，disagree/d 更正",
        artifact.camera_label,
        confidence_percent(artifact.camera_confidence)
      )
    }),
    Command::Agree => print_outcome(session.agree(), |saved| println!("{}", saved)),
    Command::Disagree => {
      let labels = session.labels().clone();
      print_outcome(session.disagree(), |_| print_label_menu(&labels))
    }
    Command::Choose(LabelChoice::Index(index)) => {
      print_outcome(session.choose_index(index), |saved| println!("{}", saved))
    }
    Command::Choose(LabelChoice::Name(name)) => {
      print_outcome(session.choose(&name), |saved| println!("{}", saved))
    }
    Command::Folder(path) => match session.grant_base_directory(DirectoryStore::new(path)) {
      Ok(()) => println!("{}", session.status().save),
      Err(e) => println!("{}", e),
    },
    Command::Release => {
      session.release_camera();
      println!(
        "摄像头{}",
        if session.camera_acquired() { "仍在使用" } else { "已释放" }
      );
    }
    Command::Status => print_status(session),
    Command::Help => println!("{}", HELP),
    Command::Quit => return Flow::Quit,
  }
  Flow::Continue
}

impl<I, M, C, K, E, F> Task<I, M, Storage> for CaptureTask
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
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: Storage) -> Result<(), Self::Error> {
    info!("开始任务...");
    let CaptureTask {
      interval,
      labels,
      options,
      frame_number,
      handle_interrupt,
      tx,
      rx,
    } = self;
    if handle_interrupt {
      install_interrupt_handler(tx.clone())?;
    }
    // 所有发送端关闭后循环结束
    drop(tx);

    let mut session = CaptureSession::new(input, model, labels, output).with_options(options);

    // 启动失败只报告一次，可以用 start 命令重试
    if let Err(e) = session.start() {
      println!("{}", e);
    }

    let mut frame_index = 0usize;
    let mut shown_label: Option<String> = None;
    let mut next_tick = Instant::now();

    loop {
      let now = Instant::now();
      if now >= next_tick {
        // 错过的帧不补
        next_tick = now + interval;
        if let Ok(Some(prediction)) = session.tick() {
          frame_index += 1;
          debug!("第 {} 帧预测:\n{}", frame_index, prediction);
          if let Some(best) = prediction.best() {
            if shown_label.as_deref() != Some(best.label.as_str()) {
              info!("当前判断: {} ({:.2}%)", best.label, best.score * 100.0);
              shown_label = Some(best.label.clone());
            }
          }
          if frame_number.map(|n| frame_index >= n).unwrap_or(false) {
            info!("达到指定帧数 {}, 退出任务循环", frame_index);
            break;
          }
        }
      }

      match rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
        Ok(command) => {
          if let Flow::Quit = handle_command(&mut session, command) {
            break;
          }
        }
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }

    session.teardown();
    info!("任务完成，退出");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fixture::{FakeCameraSource, FakeModelSource};
  use crate::output::DownloadStore;

  #[test]
  fn parses_commands_and_aliases() {
    assert_eq!("start".parse::<Command>(), Ok(Command::Start));
    assert_eq!(" C ".parse::<Command>(), Ok(Command::Capture));
    assert_eq!("a".parse::<Command>(), Ok(Command::Agree));
    assert_eq!("disagree".parse::<Command>(), Ok(Command::Disagree));
    assert_eq!("stop".parse::<Command>(), Ok(Command::Pause));
    assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
  }

  #[test]
  fn choose_accepts_one_based_index_or_label() {
    assert_eq!(
      "choose 2".parse::<Command>(),
      Ok(Command::Choose(LabelChoice::Index(1)))
    );
    assert_eq!("3".parse::<Command>(), Ok(Command::Choose(LabelChoice::Index(2))));
    assert_eq!(
      "choose Big Lot".parse::<Command>(),
      Ok(Command::Choose(LabelChoice::Name("Big Lot".to_string())))
    );
    assert_eq!(
      "choose 0".parse::<Command>(),
      Err(CommandError::InvalidIndex("0".to_string()))
    );
    assert_eq!(
      "choose".parse::<Command>(),
      Err(CommandError::MissingArgument("choose"))
    );
  }

  #[test]
  fn folder_keeps_spaces_in_path() {
    assert_eq!(
      "folder /data/my captures".parse::<Command>(),
      Ok(Command::Folder(PathBuf::from("/data/my captures")))
    );
  }

  #[test]
  fn rejects_unknown_and_empty_lines() {
    assert_eq!("   ".parse::<Command>(), Err(CommandError::Empty));
    assert_eq!(
      "snapshot".parse::<Command>(),
      Err(CommandError::Unknown("snapshot".to_string()))
    );
  }

  #[test]
  fn end_of_input_sends_quit() {
    let (tx, rx) = mpsc::channel();
    read_commands(std::io::Cursor::new("c\n\nbogus\n2\n"), &tx);
    let received = rx.try_iter().collect::<Vec<_>>();
    assert_eq!(
      received,
      vec![
        Command::Capture,
        Command::Choose(LabelChoice::Index(1)),
        Command::Quit
      ]
    );
  }

  #[test]
  fn loop_ends_when_senders_are_dropped() {
    let downloads = tempfile::tempdir().unwrap();
    let camera = FakeCameraSource::default();
    let task = CaptureTask::new(1000);
    let tx = task.sender();
    tx.send(Command::Capture).unwrap();
    drop(tx);

    task
      .run_task(
        camera.clone(),
        FakeModelSource::default(),
        Storage::new(DownloadStore::new(downloads.path())),
      )
      .unwrap();
    assert_eq!(camera.opened.get(), 1);
    // 未确认的采集在结束时丢弃
    assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
  }

  #[test]
  fn one_shot_writes_prediction() {
    let mut out = Vec::new();
    OneShotTask
      .run_task(FakeCameraSource::default(), FakeModelSource::default(), &mut out)
      .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("> Snyders: 87.30%"));
  }

  #[test]
  fn one_shot_reports_camera_failure() {
    let camera = FakeCameraSource {
      fail_open: true,
      ..FakeCameraSource::default()
    };
    let result = OneShotTask.run_task(camera, FakeModelSource::default(), Vec::new());
    assert!(result.unwrap_err().to_string().contains("permission denied"));
  }

  #[test]
  fn capture_loop_stops_after_frame_number() {
    let downloads = tempfile::tempdir().unwrap();
    let camera = FakeCameraSource::default();
    let task = CaptureTask::new(1000).with_frame_number(Some(3));

    task
      .run_task(
        camera.clone(),
        FakeModelSource::default(),
        Storage::new(DownloadStore::new(downloads.path())),
      )
      .unwrap();
    assert_eq!(camera.opened.get(), 1);
  }

  #[test]
  fn queued_commands_capture_and_save() {
    let downloads = tempfile::tempdir().unwrap();
    let task = CaptureTask::new(1000);
    let tx = task.sender();
    tx.send(Command::Capture).unwrap();
    tx.send(Command::Disagree).unwrap();
    tx.send(Command::Choose(LabelChoice::Index(0))).unwrap();
    tx.send(Command::Quit).unwrap();

    task
      .run_task(
        FakeCameraSource::default(),
        FakeModelSource::default(),
        Storage::new(DownloadStore::new(downloads.path())),
      )
      .unwrap();

    let files: Vec<String> = std::fs::read_dir(downloads.path())
      .unwrap()
      .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("Disagree_Big Lot_"));
    assert!(files[0].ends_with("_Snyders_87%.png"));
  }

  #[test]
  fn quit_before_any_frame_tears_down() {
    let downloads = tempfile::tempdir().unwrap();
    let model = FakeModelSource::default();
    let task = CaptureTask::new(1000).with_labels(Labels::default());
    task.sender().send(Command::Quit).unwrap();

    task
      .run_task(
        FakeCameraSource::default(),
        model.clone(),
        Storage::new(DownloadStore::new(downloads.path())),
      )
      .unwrap();
    assert_eq!(model.loaded.get(), 1);
    assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
  }
}
