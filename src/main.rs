use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::error;
use shape_pca::config::{PipelineConfig, DEFAULT_EXTENSION_PATTERN, DEFAULT_INPUT_DIR};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Build a statistical shape model from a directory of corresponding meshes
/// and write the first mesh reprojected onto its leading modes.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory containing the input meshes
    #[arg(default_value = DEFAULT_INPUT_DIR)]
    input_dir: PathBuf,

    /// Number of leading modes used for the reprojection
    #[arg(short = 'k', long, default_value_t = 1)]
    components: usize,

    /// Output mesh path [default: <INPUT_DIR>/Output/output_pca.ply]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Regex matched against the whole file extension, dot included
    #[arg(short, long, default_value = DEFAULT_EXTENSION_PATTERN)]
    extension: String,

    /// Also save the computed shape model to this file
    #[arg(long)]
    model_out: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.input_dir);
        config.num_components = self.components;
        config.extension_pattern = self.extension;
        config.model_path = self.model_out;
        if let Some(output) = self.output {
            config.output_path = output;
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn run(config: &PipelineConfig) -> anyhow::Result<()> {
    let summary = shape_pca::run(config)
        .with_context(|| format!("shape model run on {} failed", config.input_dir.display()))?;
    println!(
        "{} of {} meshes accepted, {} components, output written to {}",
        summary.files_accepted,
        summary.files_discovered,
        summary.model.n_components(),
        summary.output_path.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let config = Cli::parse().into_config();
    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
