//! PerioGT CLI - batch-friendly polymer property inference for HPC nodes
//!
//! Results go to stdout as JSON or CSV; logs and errors go to stderr.
//! Exit codes: 0 success, 1 partial failure (batch rows or doctor warnings),
//! 2 fatal error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use periogt_core::config::{ENV_BASE_DIR, ENV_CHECKPOINT_DIR, ENV_DEVICE, ENV_RESULTS_DIR, ENV_SRC_DIR};
use periogt_core::ConfigInputs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// PerioGT - polymer property prediction from repeat-unit SMILES
///
/// Examples:
///   periogt setup                               # Fetch and index checkpoints
///   periogt doctor                              # Check GPU, paths and artifacts
///   periogt predict --smiles '*CC*' --property tg
///   periogt batch --input polymers.csv --property eps
#[derive(Parser, Debug)]
#[command(
    name = "periogt",
    about = "PerioGT polymer property inference",
    version = env!("CARGO_PKG_VERSION"),
    arg_required_else_help = true,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub paths: PathArgs,
}

/// Directory and device overrides; each falls back to its environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Base directory for checkpoints, results and sources
    #[arg(long, global = true, value_name = "DIR", env = ENV_BASE_DIR)]
    pub base_dir: Option<PathBuf>,

    /// Checkpoint root (default: <base>/checkpoints)
    #[arg(long, global = true, value_name = "DIR", env = ENV_CHECKPOINT_DIR)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Results directory (default: <base>/results)
    #[arg(long, global = true, value_name = "DIR", env = ENV_RESULTS_DIR)]
    pub results_dir: Option<PathBuf>,

    /// Model source directory holding model_config.json (default: <base>/src)
    #[arg(long, global = true, value_name = "DIR", env = ENV_SRC_DIR)]
    pub src_dir: Option<PathBuf>,

    /// Device: auto, cpu or cuda
    #[arg(long, global = true, value_name = "DEVICE", env = ENV_DEVICE)]
    pub device: Option<String>,
}

impl PathArgs {
    pub fn inputs(&self) -> ConfigInputs {
        ConfigInputs {
            base_dir: self.base_dir.clone(),
            checkpoint_dir: self.checkpoint_dir.clone(),
            results_dir: self.results_dir.clone(),
            src_dir: self.src_dir.clone(),
            device: self.device.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download, verify and extract checkpoints, then build index.json
    Setup {
        /// Only index artifacts that are already in place
        #[arg(long)]
        skip_download: bool,
    },

    /// Print runtime diagnostics and a PASS/WARN/FAIL verdict
    Doctor,

    /// Predict one property for one SMILES
    Predict {
        /// Polymer repeat-unit SMILES with two '*' connection points
        #[arg(long)]
        smiles: String,

        /// Property id (see `index.json`)
        #[arg(long)]
        property: String,

        /// Include the graph embedding in the response
        #[arg(long)]
        return_embedding: bool,

        #[arg(long, value_enum, default_value = "json")]
        format: PredictFormat,
    },

    /// Compute the graph embedding for one SMILES
    #[command(alias = "embeddings")]
    Embed {
        #[arg(long)]
        smiles: String,
    },

    /// Run predictions for every row of a CSV file
    Batch {
        /// Input CSV with a `smiles` column and an optional `id` column
        #[arg(long = "input", value_name = "CSV")]
        input: PathBuf,

        #[arg(long)]
        property: String,

        /// Output CSV (default: <input stem>_predictions.csv)
        #[arg(long = "output", value_name = "CSV")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PredictFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "periogt_core=info,periogt_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let inputs = cli.paths.inputs();
    let result = match cli.command {
        Commands::Setup { skip_download } => commands::setup(&inputs, skip_download).await,
        Commands::Doctor => commands::doctor(&inputs),
        Commands::Predict {
            smiles,
            property,
            return_embedding,
            format,
        } => commands::predict(&inputs, &smiles, &property, return_embedding, format).await,
        Commands::Embed { smiles } => commands::embed(&inputs, &smiles).await,
        Commands::Batch {
            input,
            property,
            output,
        } => commands::batch(&inputs, &input, &property, output.as_deref()).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            let detail = err.detail();
            commands::emit_error(&detail);
            detail.code.exit_code()
        }
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}
