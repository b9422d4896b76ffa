//! testmd CLI - inspect and normalize accepted result files
//!
//! Accepted files are written by test runs; this tool checks that they parse, rewrites
//! them in canonical form and lists the permutations they contain.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::{error, info};

mod commands;

use commands::*;
use testmd::Config;

/// testmd - approval testing result files
#[derive(Parser)]
#[command(name = "testmd")]
#[command(about = "Inspect and normalize testmd accepted files")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "testmd.toml")]
    config: PathBuf,

    /// Print machine readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse accepted files and summarize their tests
    Check {
        /// Accepted files (defaults to every file under the base directory)
        files: Vec<PathBuf>,
    },

    /// Rewrite accepted files in canonical form
    Fmt {
        /// Accepted files (defaults to every file under the base directory)
        files: Vec<PathBuf>,
        /// Only report files that would change
        #[arg(long)]
        check: bool,
    },

    /// List the permutations of an accepted file
    List {
        /// Accepted file
        file: PathBuf,
        /// Only show this test
        #[arg(short, long)]
        test: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = Config::load(&cli.config)
        .and_then(Config::with_env_overrides)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let result = match cli.command {
        Commands::Check { files } => {
            check_command(&resolve_files(files, &config)?, cli.json, cli.verbose)
        }
        Commands::Fmt { files, check } => fmt_command(&resolve_files(files, &config)?, check),
        Commands::List { file, test } => list_command(&file, test.as_deref(), cli.json),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Explicit files, or every accepted file under the configured base directory.
fn resolve_files(files: Vec<PathBuf>, config: &Config) -> Result<Vec<PathBuf>> {
    if !files.is_empty() {
        return Ok(files);
    }

    let mut found = Vec::new();
    if config.base_directory.is_dir() {
        collect_accepted_files(&config.base_directory, &mut found)?;
    }
    found.sort();

    if found.is_empty() {
        anyhow::bail!(
            "No accepted files found under {}",
            config.base_directory.display()
        );
    }
    Ok(found)
}

fn collect_accepted_files(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_accepted_files(&path, found)?;
        } else if path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.ends_with(testmd::config::ACCEPTED_FILE_SUFFIX))
        {
            found.push(path);
        }
    }
    Ok(())
}
