//! Make JPEG thumbnails from the command line

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::instrument;

use jpegthumb::{
    codec::{SavedMarker, DEFAULT_QUALITY},
    thumb::{self, ThumbOptions},
    ColorSpace, ImageHandle, Outcome,
};

#[derive(Debug, Parser)]
#[command(version, about = "Fast JPEG thumbnails")]
struct Cli {
    /// More logging. Three or more also logs every corrupt-data warning.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print what the header says, as JSON.
    Info { input: PathBuf },
    /// Make one thumbnail.
    Thumb {
        input: PathBuf,
        output: PathBuf,
        /// Target width. With only one of width and height the other
        /// follows the aspect ratio.
        #[arg(short = 'W', long)]
        width: Option<u32>,
        #[arg(short = 'H', long)]
        height: Option<u32>,
        #[arg(short, long, default_value_t = DEFAULT_QUALITY)]
        quality: u8,
        /// Average neighbours when shrinking.
        #[arg(short, long)]
        smooth: bool,
        /// Cut out a region first.
        #[arg(long, num_args = 4, value_names = ["X", "Y", "WIDTH", "HEIGHT"])]
        crop: Option<Vec<i32>>,
    },
    /// Thumbnail many files at once, each into OUT_DIR/<name>.thumb.jpg.
    Batch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 200)]
        max_width: u32,
        #[arg(long, default_value_t = 200)]
        max_height: u32,
        #[arg(short, long, default_value_t = DEFAULT_QUALITY)]
        quality: u8,
        #[arg(short, long)]
        smooth: bool,
    },
}

#[derive(Debug, Serialize)]
struct Info<'a> {
    path: &'a Path,
    width: u32,
    height: u32,
    color_space: ColorSpace,
    comment: Option<String>,
    markers: &'a [SavedMarker],
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    input: &'a Path,
    output: Option<&'a Path>,
    outcome: Outcome,
    width: Option<u32>,
    height: Option<u32>,
    last_valid_row: Option<u32>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.cmd {
        Cmd::Info { input } => info(&input),
        Cmd::Thumb {
            input,
            output,
            width,
            height,
            quality,
            smooth,
            crop,
        } => one(
            &input,
            &output,
            (width, height),
            crop.as_deref(),
            quality,
            smooth,
            cli.verbose,
        ),
        Cmd::Batch {
            inputs,
            out_dir,
            max_width,
            max_height,
            quality,
            smooth,
        } => {
            let opts = ThumbOptions {
                max_width,
                max_height,
                quality,
                smoothing: smooth,
            };
            batch(inputs, out_dir, opts).await
        }
    }
}

#[instrument]
fn info(input: &Path) -> Result<ExitCode> {
    let handle = ImageHandle::open_file(input)
        .with_context(|| format!("info: cannot open {}", input.display()))?;
    let (width, height) = handle.size();
    let info = Info {
        path: input,
        width,
        height,
        color_space: handle.color_space(),
        comment: handle.comment(),
        markers: handle.markers(),
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(ExitCode::SUCCESS)
}

#[instrument]
fn one(
    input: &Path,
    output: &Path,
    size: (Option<u32>, Option<u32>),
    crop: Option<&[i32]>,
    quality: u8,
    smooth: bool,
    trace_level: u8,
) -> Result<ExitCode> {
    let mut handle = ImageHandle::open_file(input)
        .with_context(|| format!("thumb: cannot open {}", input.display()))?;
    handle.set_trace_level(trace_level);
    handle.set_quality(quality, smooth);

    let (nw, nh) = handle.size();
    match crop {
        Some(&[x, y, cw, ch]) => {
            let (tw, th) = match size {
                (Some(w), Some(h)) => (w, h),
                (w, h) => thumb::fit_size(
                    (cw.max(1) as u32, ch.max(1) as u32),
                    (w.unwrap_or(u32::MAX), h.unwrap_or(u32::MAX)),
                ),
            };
            handle.set_crop_bounds(x, y, cw, ch, tw as i32, th as i32);
        }
        Some(other) => anyhow::bail!("thumb: --crop takes 4 values, got {}", other.len()),
        None => {
            let (tw, th) = match size {
                (Some(w), Some(h)) => (w, h),
                (None, None) => (nw, nh),
                (w, h) => thumb::fit_size(
                    (nw, nh),
                    (w.unwrap_or(u32::MAX), h.unwrap_or(u32::MAX)),
                ),
            };
            handle.set_target_size(tw as i32, th as i32);
        }
    }
    handle.set_file_output(Some(output));

    let result = handle.encode();
    let outcome = Outcome::from(&result);
    let (tw, th) = handle.target_size();
    let report = Report {
        input,
        output: Some(output),
        outcome,
        width: Some(tw),
        height: Some(th),
        last_valid_row: handle.last_valid_row(),
        error: result.err().map(|e| format!("{:#}", anyhow::Error::new(e))),
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(ExitCode::from(report.outcome.code()))
}

#[instrument(skip(inputs))]
async fn batch(inputs: Vec<PathBuf>, out_dir: PathBuf, opts: ThumbOptions) -> Result<ExitCode> {
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("batch: cannot create {}", out_dir.display()))?;

    let jobs: Vec<_> = inputs
        .into_iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_owned());
            let output = out_dir.join(format!("{stem}.thumb.jpg"));
            let join = tokio::task::spawn_blocking({
                let (input, output) = (input.clone(), output.clone());
                move || -> Result<thumb::Thumbnail> {
                    let t = thumb::fit_file(&input, &opts)?;
                    std::fs::write(&output, &t.jpeg)
                        .with_context(|| format!("batch: cannot write {}", output.display()))?;
                    Ok(t)
                }
            });
            (input, output, join)
        })
        .collect();

    let mut failed = 0usize;
    for (input, output, join) in jobs {
        let result = join.await.context("batch: thread join fail")?;
        let report = match &result {
            Ok(t) => Report {
                input: &input,
                output: Some(&output),
                outcome: Outcome::Ok,
                width: Some(t.width),
                height: Some(t.height),
                last_valid_row: t.last_valid_row,
                error: None,
            },
            Err(e) => {
                failed += 1;
                tracing::warn!("{}: {e:#}", input.display());
                Report {
                    input: &input,
                    output: None,
                    outcome: e
                        .downcast_ref::<jpegthumb::ThumbError>()
                        .map_or(Outcome::EncodeFailed, |e| e.outcome()),
                    width: None,
                    height: None,
                    last_valid_row: None,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        println!("{}", serde_json::to_string(&report)?);
    }
    tracing::info!(failed, "batch done");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
