// 该文件是 Biaozhu （标注） 项目的一部分。
// src/bin/capture.rs - 交互式标注采集
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use biaozhu::{
  FromUrl,
  input::InputWrapper,
  model::ModelWrapper,
  output::{DownloadStore, OutputWrapper, Storage},
  session::SessionOptions,
  task::{CaptureTask, HELP, Task, spawn_stdin_reader},
};
use tracing::info;

/// 标注采集参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分类模型，如 onnx:///models/snacks.onnx?labels=Big%20Lot,C%20Press,Snyders
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，如 v4l2:///dev/video0 或 image:///data/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 保存位置，如 folder:///data/captures?record
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 未选择保存目录时的下载目录
  #[arg(long, value_name = "DIR", default_value = ".")]
  pub download_dir: std::path::PathBuf,
  /// 推理帧率
  #[arg(long, value_name = "FPS", default_value_t = 30)]
  pub fps: u32,
  /// 保存后释放摄像头，重新开始时再打开
  #[arg(long)]
  pub release_on_freeze: bool,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("下载目录: {}", args.download_dir.display());

  let input = InputWrapper::from_url(&args.input)?;
  let model = ModelWrapper::<224>::from_url(&args.model)?;
  let labels = model.labels().clone();

  let mut storage = Storage::new(DownloadStore::new(&args.download_dir));
  if let Some(output) = &args.output {
    info!("保存位置: {}", output);
    storage = storage.with_output(OutputWrapper::from_url(output)?);
  }

  let task = CaptureTask::new(args.fps)
    .with_labels(labels)
    .with_options(SessionOptions {
      release_on_freeze: args.release_on_freeze,
    })
    .with_frame_number(args.frame_number)
    .with_interrupt_handler(true);

  println!("{}", HELP);
  spawn_stdin_reader(task.sender());
  task.run_task(input, model, storage)?;

  Ok(())
}
