//! clipstitch CLI: turn clip lists into bumpered compilation videos.
//!
//! Usage:
//!   clipstitch compile <CLIPS>   Build compilations from a clip list
//!   clipstitch check             Check tools and asset directories
//!   clipstitch init              Write a default config file
//!   clipstitch clean             Apply a retention policy to the cache

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clipstitch_common::StitchError;

mod commands;

#[derive(Parser)]
#[command(
    name = "clipstitch",
    about = "Stitch short clips into compilations with bumpers and transitions",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/clipstitch/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build compilations from a clip list
    Compile {
        /// Path to the clip list (clips.json)
        clips: PathBuf,

        /// Number of compilations to produce
        #[arg(short = 'n', long)]
        compilations: Option<usize>,

        /// Clips per compilation
        #[arg(long)]
        per: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cache directory
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Directory holding static, intro, outro and transition assets
        #[arg(long)]
        transitions_dir: Option<PathBuf>,

        /// Seed for reproducible shuffling and transition choice
        #[arg(long)]
        seed: Option<u64>,

        /// Disable the author caption overlay
        #[arg(long)]
        no_overlay: bool,

        /// Re-download clips even when a cached source exists
        #[arg(long)]
        rebuild: bool,

        /// Re-normalize bumper assets, ignoring the manifest
        #[arg(long)]
        transitions_rebuild: bool,

        /// Overwrite existing output files instead of suffixing
        #[arg(long)]
        overwrite: bool,

        /// Window start (MM/DD/YYYY, MM-DD-YYYY or YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Window end
        #[arg(long)]
        end: Option<String>,

        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// Check external tools, asset directories and writability
    Check,

    /// Write the default config file
    Init {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Apply a retention policy to the cache directory
    Clean {
        /// default | keep-all | purge-all (defaults to the configured policy)
        #[arg(long, value_enum)]
        policy: Option<commands::clean::Policy>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let status = e
                .downcast_ref::<StitchError>()
                .map(StitchError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(status).unwrap_or(1))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.as_deref();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Compile {
            clips,
            compilations,
            per,
            output,
            cache,
            transitions_dir,
            seed,
            no_overlay,
            rebuild,
            transitions_rebuild,
            overwrite,
            start,
            end,
            summary_json,
        } => {
            let config = commands::prepare(config_path, verbose)?;
            let overrides = commands::compile::Overrides {
                compilations,
                per,
                output,
                cache,
                transitions_dir,
                seed,
                no_overlay,
                rebuild,
                transitions_rebuild,
                overwrite,
                start,
                end,
            };
            commands::compile::run(config, clips, overrides, summary_json).await
        }
        Commands::Check => commands::check::run(&commands::prepare(config_path, verbose)?),
        Commands::Init { force } => commands::init::run(config_path, force),
        Commands::Clean { policy } => {
            commands::clean::run(&commands::prepare(config_path, verbose)?, policy).await
        }
    }
}
