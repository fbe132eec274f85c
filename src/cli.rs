use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::{Context, Result};
use tracing::info;

use calldoc::config::Config;
use calldoc::core::{Engine, ExplicitEntryPoints, FileEntryPoints, RouteEntryPoints, RunReport};

#[derive(Parser)]
#[command(name = "calldoc")]
#[command(about = "Writes Python docstrings bottom-up along the call graph")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default calldoc.toml
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Document a function, or every top-level declaration of a file
    Generate {
        /// Source file containing the root
        #[arg(short, long)]
        file: PathBuf,

        /// Root function or class; all top-level declarations when omitted
        #[arg(long)]
        function: Option<String>,

        /// Generate and store docstrings without modifying source files
        #[arg(long)]
        dry_run: bool,
    },

    /// Document every decorated route handler under a directory
    Routes {
        /// Directory to scan (defaults to the project root)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Generate and store docstrings without modifying source files
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the call graph of a root as JSON
    Graph {
        /// Source file containing the root
        #[arg(short, long)]
        file: PathBuf,

        /// Root function or class
        #[arg(long)]
        function: String,
    },

    /// Summarize the processed store
    Status,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        Config::load_or_default(self.config.as_deref()).context("Failed to load configuration")
    }

    pub async fn execute(self) -> Result<()> {
        match &self.command {
            Commands::Init { path } => {
                let target_dir = match path {
                    Some(path) => path.clone(),
                    None => std::env::current_dir()?,
                };
                let config_path = Engine::init(&target_dir)?;
                println!("Wrote {}", config_path.display());
                Ok(())
            }
            Commands::Generate { file, function, dry_run } => {
                let mut engine = Engine::new(self.load_config()?)?;
                let report = match function {
                    Some(function) => {
                        let provider = ExplicitEntryPoints::single(file.clone(), function.clone());
                        engine.run(&provider, *dry_run).await?
                    }
                    None => {
                        let provider = FileEntryPoints::new(vec![file.clone()]);
                        engine.run(&provider, *dry_run).await?
                    }
                };
                print_report(&report);
                Ok(())
            }
            Commands::Routes { dir, dry_run } => {
                let config = self.load_config()?;
                let dir = dir.clone().unwrap_or_else(|| config.project.root.clone());
                let provider = RouteEntryPoints::new(&dir, &config.project, &config.entry_points)?;
                let mut engine = Engine::new(config)?;
                let report = engine.run(&provider, *dry_run).await?;
                print_report(&report);
                Ok(())
            }
            Commands::Graph { file, function } => {
                let mut engine = Engine::new(self.load_config()?)?;
                let graph = engine.call_graph(file, function)?;
                println!("{}", serde_json::to_string_pretty(&graph)?);
                Ok(())
            }
            Commands::Status => {
                let engine = Engine::new(self.load_config()?)?;
                let status = engine.status();
                match &status.path {
                    Some(path) => println!("Store: {}", path.display()),
                    None => println!("Store: in memory"),
                }
                println!("Records: {}", status.records);
                println!("Files: {}", status.files);
                Ok(())
            }
        }
    }
}

fn print_report(report: &RunReport) {
    info!("📊 Run summary:");
    info!("  - {} docstrings generated", report.processed);
    info!("  - {} reused from cache", report.cache_hits);
    info!("  - {} failed", report.failed);
    info!("  - {} unresolved calls skipped", report.skipped_unresolved);
    info!("  - {} cycles broken", report.cycles_broken);
    info!("  - {} files written", report.files_written);
    if report.unparsable + report.missing_roots + report.splice_failures > 0 {
        info!(
            "  - {} unparsable roots, {} missing roots, {} splice failures",
            report.unparsable, report.missing_roots, report.splice_failures
        );
    }
}
