//! Timely CLI Module
//!
//! Command-line interface for hold-out evaluation, per-sample detection and
//! recording inspection.

use clap::{Parser, Subcommand};
use colored::*;
use ndarray::Axis;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::anomaly::get_model;
use crate::data::{load_recording, FeatureRef, LvmOptions, Recording};
use crate::detection::predict_anomaly;
use crate::evaluation::{write_csv, EvaluationParams, HoldoutEvaluation, StateOutcome};
use crate::preprocessing::{apply_scaler, fit_scaler, resample, ScalerType};
use crate::windowing::{prepare_data, shuffle_windows};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "timely")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hold-out anomaly detection and fault localization for sensor recordings")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the leave-one-state-out evaluation described by a JSON params file
    Evaluate {
        /// JSON params file
        #[arg(short, long)]
        input: PathBuf,

        /// Override the output directory of the params file
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Train on normal recordings and flag every sample of another recording
    Detect {
        /// Normal recordings used for training
        #[arg(short, long, num_args = 1.., required = true)]
        train: Vec<PathBuf>,

        /// Recording to analyse
        #[arg(short, long)]
        data: PathBuf,

        /// Feature columns (names or positions), comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        features: Vec<String>,

        /// Window length in samples
        #[arg(short, long, default_value = "80")]
        kernel: usize,

        /// Model key (isolation_forest, lof, pca, deep, lstm, bilstm)
        #[arg(short, long, default_value = "lstm")]
        model: String,

        /// JSON model params file
        #[arg(long)]
        params: Option<PathBuf>,

        /// Scaler (minmax, standard, robust, maxabs, none)
        #[arg(long, default_value = "minmax")]
        transform: String,

        /// Block-mean resampling rate
        #[arg(long)]
        resample_rate: Option<usize>,

        /// Use non-overlapping windows
        #[arg(long)]
        skip: bool,

        /// Use LVM channel names as column names
        #[arg(long)]
        channel_names: bool,

        /// Output CSV with one flag per sample
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show shape and per-column statistics of a recording
    Inspect {
        /// Recording file (LVM or CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Use LVM channel names as column names
        #[arg(long)]
        channel_names: bool,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

fn print_outcome(outcome: &StateOutcome) {
    println!();
    println!(
        "  {} {}  {}",
        muted("State"),
        outcome.state_id.to_string().white().bold(),
        dim(&outcome.state_name)
    );
    for line in outcome.report.to_string().lines() {
        println!("  {}", line);
    }
    println!("  {:<16} {}", muted("Threshold"), format!("{:.6}", outcome.threshold).white());

    if let Some(locate) = &outcome.locate {
        let mut means = locate.feature_means();
        means.sort_by(|a, b| b.1.total_cmp(&a.1));
        println!("  {}", muted("Feature error (held-out windows)"));
        for (name, err) in means.iter().take(5) {
            println!("    {:<24} {}", name, format!("{:.6}", err).white());
        }
    }
}

pub fn cmd_evaluate(input: &Path, output_dir: Option<&Path>) -> anyhow::Result<()> {
    section("Evaluate");

    let mut params = EvaluationParams::from_file(input)?;
    if let Some(dir) = output_dir {
        params.output_dir = dir.to_path_buf();
    }

    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "Hold-out evaluation".white().bold()));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("Model    ", &params.model_type));
    line_box(&kv("States   ", &params.all_state_folder.len().to_string()));
    line_box(&kv("Kernel   ", &format!("{} (stride {})", params.kernel, params.stride)));
    line_box(&kv("Transform", &format!("{:?}", params.transform_type)));
    line_box(&kv("Output   ", &params.output_dir.display().to_string()));
    line_box_empty();
    line_box_bottom();
    println!();

    let evaluation = HoldoutEvaluation::new(params)?;

    step_run("Loading recordings");
    let start = Instant::now();
    let states = evaluation.load_states()?;
    let n_files: usize = states.iter().map(|s| s.files.len()).sum();
    step_done(&format!("{} states, {} files in {:?}", states.len(), n_files, start.elapsed()));

    for state_id in 0..states.len() {
        step_run(&format!("Holding out state {}", state_id.to_string().cyan()));
        let start = Instant::now();
        let outcome = evaluation.evaluate_state(&states, state_id)?;
        step_done(&format!(
            "train {:?}, test {:?} in {:?}",
            outcome.train_shape,
            outcome.test_shape,
            start.elapsed()
        ));
        print_outcome(&outcome);

        for path in outcome.anomaly_file.iter().chain(outcome.locate_file.iter()) {
            step_ok(&format!("Saved {}", path.display()));
        }
    }

    println!();
    Ok(())
}

fn load_selected(
    path: &Path,
    features: &[FeatureRef],
    resample_rate: Option<usize>,
    lvm_options: &LvmOptions,
) -> anyhow::Result<Recording> {
    let recording = load_recording(path, lvm_options)?.select(features)?;
    Ok(match resample_rate {
        Some(rate) => resample(&recording, rate)?,
        None => recording,
    })
}

/// `--features` entry: all digits selects a column index, anything else a channel name
fn parse_feature(raw: &str) -> FeatureRef {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(index) = raw.parse::<usize>() {
            return FeatureRef::Index(index);
        }
    }
    FeatureRef::from(raw)
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_detect(
    train: &[PathBuf],
    data: &Path,
    features: &[String],
    kernel: usize,
    model_type: &str,
    params: Option<&Path>,
    transform: &str,
    resample_rate: Option<usize>,
    with_skip: bool,
    channel_names: bool,
    output: &Path,
) -> anyhow::Result<()> {
    section("Detect");

    let features: Vec<FeatureRef> = features.iter().map(|f| parse_feature(f)).collect();
    let lvm_options = LvmOptions::default().with_channel_names(channel_names);
    let scaler_type: ScalerType = transform.parse()?;

    step_run("Loading recordings");
    let start = Instant::now();
    let mut train_recs = train
        .iter()
        .map(|p| load_selected(p, &features, resample_rate, &lvm_options))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut target = vec![load_selected(data, &features, resample_rate, &lvm_options)?];
    step_done(&format!("{} training files in {:?}", train_recs.len(), start.elapsed()));

    if scaler_type != ScalerType::None {
        let scaler = fit_scaler(&train_recs, scaler_type)?;
        train_recs = apply_scaler(&scaler, &train_recs)?;
        target = apply_scaler(&scaler, &target)?;
    }

    let labels = vec![0; train_recs.len()];
    let (x_train, y_train) = prepare_data(&train_recs, &labels, kernel, 1)?;
    if x_train.len_of(Axis(0)) == 0 {
        anyhow::bail!("Training recordings are shorter than the kernel ({})", kernel);
    }
    let (x_train, _) = shuffle_windows(&x_train, &y_train, Some(42));

    step_run(&format!("Training {}", model_type.cyan()));
    let start = Instant::now();
    let mut model = get_model(model_type, params)?;
    model.fit(&x_train)?;
    step_done(&format!("{} windows in {:?}", x_train.len_of(Axis(0)), start.elapsed()));

    step_run("Predicting");
    let flags = predict_anomaly(&target[0], model.as_ref(), kernel, with_skip)?;
    let n_flagged = flags.iter().filter(|&&f| f > 0.0).count();
    step_done(&format!("{} / {} samples flagged", n_flagged, flags.len()));

    let mut df = DataFrame::new(vec![Column::new("anomaly".into(), flags.to_vec())])?;
    write_csv(&mut df, output)?;
    step_ok(&format!("Saved {}", output.display()));

    println!();
    println!("  {:<16} {}", muted("Threshold"), format!("{:.6}", model.threshold()).white().bold());
    println!();
    Ok(())
}

pub fn cmd_inspect(data: &Path, channel_names: bool) -> anyhow::Result<()> {
    section("Recording Info");

    let lvm_options = LvmOptions::default().with_channel_names(channel_names);
    let recording = load_recording(data, &lvm_options)?;

    println!("  {:<12} {}", muted("File"), data.display());
    println!("  {:<12} {}", muted("Samples"), recording.len());
    println!("  {:<12} {}", muted("Columns"), recording.n_features());
    println!();

    println!(
        "  {:<20} {:>12} {:>12} {:>12} {:>12}",
        muted("Column"),
        muted("Min"),
        muted("Max"),
        muted("Mean"),
        muted("Std")
    );
    println!("  {}", dim(&"─".repeat(72)));

    for (name, column) in recording.columns().iter().zip(recording.values().axis_iter(Axis(1))) {
        let min = column.iter().copied().fold(f64::INFINITY, f64::min);
        let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = column.mean().unwrap_or(f64::NAN);
        let std = column.std(0.0);
        println!("  {:<20} {:>12.4} {:>12.4} {:>12.4} {:>12.4}", name, min, max, mean, std);
    }

    println!();
    Ok(())
}
