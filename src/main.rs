//! sarflood CLI entrypoint.
//!
//! Loads a run file (configuration plus layer paths), runs the flood
//! mapping pipeline and emits the event summary as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use sarflood::{FloodMappingConfig, FloodMappingPipeline, InputPaths};

#[derive(Parser)]
#[command(name = "sarflood", version, about = "Sentinel-1 change-detection flood mapping")]
struct CliArgs {
    /// Run file: configuration plus an `inputs` table of GeoTIFF paths
    #[arg(short, long)]
    config: PathBuf,

    /// Write the JSON summary here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Deserialize)]
struct RunFile {
    #[serde(flatten)]
    config: FloodMappingConfig,
    inputs: InputPaths,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let file = File::open(&args.config).with_context(|| format!("opening run file {}", args.config.display()))?;
    let run: RunFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing run file {}", args.config.display()))?;

    let pipeline = FloodMappingPipeline::new(run.config).context("invalid run configuration")?;
    let inputs = run
        .inputs
        .load(pipeline.config().polarization)
        .context("loading input layers")?;
    let result = pipeline.run(&inputs).context("flood mapping failed")?;

    log::info!("{}", result.summary.headline);
    let json = serde_json::to_string_pretty(&result.summary)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            log::info!("Summary written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
