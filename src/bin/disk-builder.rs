use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use disk_builder::pipeline::{execute, Pipeline, Toolchain};
use disk_builder::{preflight, BuildConfig, BuildError};

/// Build raw, GCE, VHD, MBR and ARM disk images from an ISO squashfs or a
/// container image.
#[derive(Parser, Debug)]
#[command(name = "disk-builder", version)]
struct Args {
    /// TOML build configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override a configuration key, e.g. `--set disk.gce=true`
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Cloud config copied into the image as oem/90_custom.yaml
    #[arg(long)]
    cloud_config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long)]
    debug: bool,

    /// Print the selected stages and exit
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_options(args: &Args) -> Result<disk_builder::BuildOptions> {
    let mut overrides = args.set.clone();
    if let Some(cloud_config) = &args.cloud_config {
        overrides.push(format!("cloud_config={}", cloud_config.display()));
    }
    let config = BuildConfig::load(args.config.as_deref(), &overrides)?;
    Ok(config.into_options()?)
}

fn report_error(err: &BuildError) {
    match err.stage() {
        Some(stage) => eprintln!("[disk-builder] stage '{stage}' failed ({:?})", err.kind()),
        None => eprintln!("[disk-builder] build failed ({:?})", err.kind()),
    }
    // Stage errors render their whole cause chain in Display.
    eprintln!("  {err}");
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let options = match load_options(&args) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("[disk-builder] {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::build(&options) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            report_error(&err);
            return ExitCode::FAILURE;
        }
    };

    if args.dry_run {
        for id in pipeline.ids() {
            println!("{id}");
        }
        return ExitCode::SUCCESS;
    }

    if let Err(err) = preflight::check(&pipeline, &options) {
        report_error(&err);
        return ExitCode::FAILURE;
    }

    let report = execute(&options, &Toolchain::host(&options));
    match &report.result {
        Ok(()) => {
            for output in &report.outputs {
                println!("{}", output.display());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let entered: Vec<String> =
                report.trail.entered().iter().map(|id| id.to_string()).collect();
            eprintln!("[disk-builder] entered stages: {}", entered.join(", "));
            report_error(err);
            ExitCode::FAILURE
        }
    }
}
