// CapProbe - Capability Boundary Diagnostic Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use capprobe_config::{ProbePlan, Program};
use capprobe_sim::{capture_uart, GuestImage, Outcome, Placement, RunOptions, RunReport};

const EXIT_PASS: u8 = 0;
const EXIT_TRAPPED: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(author, version, about = "CapProbe capability boundary harness", long_about = None)]
struct Cli {
    /// Enable debug logging, including per-boundary probe events
    #[arg(short = 'v', long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a diagnostic program against simulated guest memory.
    Run(RunArgs),

    /// Print a probe plan (the built-in default unless --plan is given) as YAML.
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the probe plan (YAML). Defaults to the built-in QEMU virt layout.
    #[arg(short = 'p', long)]
    plan: Option<PathBuf>,

    /// Program to run: debug or boundaries
    #[arg(long, default_value = "debug")]
    program: Program,

    /// Periodic iterations to run after the scenario pass
    #[arg(short = 'n', long, default_value = "3")]
    iterations: u32,

    /// Skip the busy-wait between periodic iterations
    #[arg(long)]
    no_delay: bool,

    /// Disable UART stdout echo (still captured for --output)
    #[arg(long)]
    no_uart_stdout: bool,

    /// Write the captured UART trace to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Write a JSON run summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Stop capturing UART output after this many bytes
    #[arg(long)]
    max_trace_bytes: Option<u64>,
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Validate and normalise this plan instead of printing the default
    #[arg(short = 'p', long)]
    plan: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    result_schema_version: &'static str,
    plan: &'a str,
    #[serde(flatten)]
    report: &'a RunReport,
    trace_bytes: u64,
    trace_truncated: bool,
    placements: &'a [Placement],
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run_program(args),
        Commands::Plan(args) => print_plan(args),
    }
}

fn load_plan(path: Option<&Path>) -> Result<ProbePlan> {
    match path {
        Some(path) => {
            info!("Loading probe plan: {:?}", path);
            ProbePlan::from_file(path)
        }
        None => {
            info!("No probe plan given; using the built-in QEMU virt layout");
            Ok(ProbePlan::default())
        }
    }
}

fn print_plan(args: PlanArgs) -> ExitCode {
    let yaml = load_plan(args.plan.as_deref()).and_then(|plan| plan.to_yaml());
    match yaml {
        Ok(yaml) => {
            print!("{}", yaml);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run_program(args: RunArgs) -> ExitCode {
    let plan = match load_plan(args.plan.as_deref()) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let image = match GuestImage::from_plan(&plan) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to build guest image: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut uart = capture_uart(
        sink.clone(),
        !args.no_uart_stdout,
        args.max_trace_bytes,
        plan.uart.settle_iterations,
    );
    let opts = RunOptions {
        program: args.program,
        iterations: args.iterations,
        skip_period_delay: args.no_delay,
    };

    info!(
        "Running {} on plan '{}' for {} iterations",
        capprobe_sim::session::program_name(args.program),
        plan.name,
        args.iterations
    );
    let report = match capprobe_sim::run(&plan, &image, &mut uart, &opts) {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let (register, _) = uart.into_parts();
    let summary = RunSummary {
        result_schema_version: RESULT_SCHEMA_VERSION,
        plan: &plan.name,
        report: &report,
        trace_bytes: register.bytes_written(),
        trace_truncated: register.limit_exceeded(),
        placements: &image.placements,
    };

    if let Err(e) = write_outputs(&args, &sink, &summary) {
        error!("{:#}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    ExitCode::from(exit_code(&report.outcome))
}

fn exit_code(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Completed => EXIT_PASS,
        Outcome::Trapped { .. } => EXIT_TRAPPED,
    }
}

fn write_outputs(args: &RunArgs, sink: &Arc<Mutex<Vec<u8>>>, summary: &RunSummary) -> Result<()> {
    if let Some(path) = &args.output {
        let bytes = sink.lock().map(|g| g.clone()).unwrap_or_default();
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write UART trace to {:?}", path))?;
        info!("UART trace written to {:?}", path);
    }

    if let Some(path) = &args.summary {
        let json = summary_json(summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run summary to {:?}", path))?;
        info!("Run summary written to {:?}", path);
    }
    Ok(())
}

fn summary_json(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("Failed to serialize run summary")
}
