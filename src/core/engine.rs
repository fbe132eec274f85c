// src/core/engine.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CalldocError, Result};
use super::splicer::apply_file_edits;
use super::{
    create_sink, CallGraph, CallGraphBuilder, DocstringEdit, DocumentationSink, EntryPointProvider,
    ProcessedStore, Resolver, RunMemo, SourceIndex, TraversalScheduler,
};

/// Counters for one run (or one root of a run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Declarations sent to the sink successfully
    pub processed: usize,
    /// Declarations whose docstring came from the store or this run's memo
    pub cache_hits: usize,
    /// Distinct `(caller, name)` calls with no resolvable definition
    pub skipped_unresolved: usize,
    pub failed: usize,
    /// Roots or scanned files that could not be parsed
    pub unparsable: usize,
    /// Roots whose function is not declared in the named file
    pub missing_roots: usize,
    pub cycles_broken: usize,
    pub files_written: usize,
    pub splice_failures: usize,
}

impl RunReport {
    pub fn merge(&mut self, other: &RunReport) {
        self.processed += other.processed;
        self.cache_hits += other.cache_hits;
        self.skipped_unresolved += other.skipped_unresolved;
        self.failed += other.failed;
        self.unparsable += other.unparsable;
        self.missing_roots += other.missing_roots;
        self.cycles_broken += other.cycles_broken;
        self.files_written += other.files_written;
        self.splice_failures += other.splice_failures;
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} generated, {} cached, {} failed, {} unresolved calls, {} cycles broken, {} files written",
            self.processed,
            self.cache_hits,
            self.failed,
            self.skipped_unresolved,
            self.cycles_broken,
            self.files_written
        )
    }
}

/// Store contents at a glance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus {
    pub path: Option<PathBuf>,
    pub records: usize,
    pub files: usize,
}

/// Main orchestration engine: entry points -> call graph -> traversal -> splice
pub struct Engine {
    config: Config,
    index: SourceIndex,
    resolver: Resolver,
    store: ProcessedStore,
    scheduler: Option<TraversalScheduler>,
    memo: RunMemo,
}

impl Engine {
    /// Create an engine with the sink described by `config.llm`.
    ///
    /// A sink that cannot be built (missing API key, unknown provider) only
    /// disables generation; graph inspection still works.
    pub fn new(config: Config) -> Result<Self> {
        let sink: Option<Arc<dyn DocumentationSink>> = match create_sink(&config) {
            Ok(sink) => {
                info!("✅ LLM integration enabled: {} ({})", sink.name(), config.llm.model);
                Some(Arc::new(sink))
            }
            Err(e) => {
                warn!("⚠️ Failed to initialize documentation sink: {}", e);
                warn!("Continuing without generation");
                None
            }
        };
        Self::build(config, sink)
    }

    /// Create an engine around an existing sink
    pub fn with_sink(config: Config, sink: Arc<dyn DocumentationSink>) -> Result<Self> {
        Self::build(config, Some(sink))
    }

    fn build(config: Config, sink: Option<Arc<dyn DocumentationSink>>) -> Result<Self> {
        config.validate()?;
        debug!("Loaded configuration: {:?}", config);

        let index = SourceIndex::new(&config.project)?;
        let resolver = Resolver::new(&config.project);
        let store = ProcessedStore::open(Self::store_path(&config))?;
        let scheduler = sink.map(|sink| TraversalScheduler::new(sink, &config.generation));

        Ok(Self {
            config,
            index,
            resolver,
            store,
            scheduler,
            memo: RunMemo::default(),
        })
    }

    /// Relative store paths live under the project root
    fn store_path(config: &Config) -> PathBuf {
        let path = &config.generation.store_path;
        if path.is_absolute() {
            path.clone()
        } else {
            config.project.root.join(path)
        }
    }

    /// Write a default configuration file into `target_dir`
    pub fn init(target_dir: &Path) -> Result<PathBuf> {
        let config_path = target_dir.join("calldoc.toml");
        if config_path.exists() {
            return Err(CalldocError::Config(format!(
                "{} already exists",
                config_path.display()
            )));
        }
        std::fs::create_dir_all(target_dir)?;
        Config::default().save(&config_path)?;
        info!("Initialized calldoc in: {}", target_dir.display());
        Ok(config_path)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ProcessedStore {
        &self.store
    }

    pub fn status(&self) -> StoreStatus {
        let mut files: Vec<&Path> = self.store.records().map(|r| r.file_path.as_path()).collect();
        files.sort();
        files.dedup();
        StoreStatus {
            path: self.store.path().map(Path::to_path_buf),
            records: self.store.len(),
            files: files.len(),
        }
    }

    /// Build the call graph of one root without generating anything
    pub fn call_graph(&mut self, file: &Path, function: &str) -> Result<CallGraph> {
        CallGraphBuilder::new(&mut self.index, &self.resolver, &self.store).build(file, function)
    }

    /// Document every root the provider yields.
    ///
    /// Roots share one run memo, so a failure is not retried and an artifact
    /// is not regenerated within the run. With `dry_run`, docstrings are
    /// generated and stored but source files are left untouched.
    pub async fn run(&mut self, provider: &dyn EntryPointProvider, dry_run: bool) -> Result<RunReport> {
        self.memo = RunMemo::default();
        let scan = provider.list_entry_points(&mut self.index)?;
        info!("🔍 Found {} entry points", scan.entry_points.len());

        let mut report = RunReport {
            unparsable: scan.unparsable.len(),
            ..RunReport::default()
        };
        for entry_point in &scan.entry_points {
            debug!("Entry point {}::{} ({})", entry_point.file.display(), entry_point.function, entry_point.reasoning);
            let root_report = self.document_root(&entry_point.file, &entry_point.function, dry_run).await?;
            report.merge(&root_report);
        }

        info!("🎉 Run complete: {}", report);
        Ok(report)
    }

    /// Build, traverse and splice the graph of a single root
    pub async fn document_root(&mut self, file: &Path, function: &str, dry_run: bool) -> Result<RunReport> {
        let mut report = RunReport::default();
        let Some(scheduler) = self.scheduler.as_ref() else {
            return Err(CalldocError::Config(
                "No documentation sink configured; check the [llm] section".to_string(),
            ));
        };

        let graph = match CallGraphBuilder::new(&mut self.index, &self.resolver, &self.store).build(file, function) {
            Ok(graph) => graph,
            Err(e) if e.is_recoverable() => {
                warn!("⚠️  Skipping root {}::{}: {}", file.display(), function, e);
                match e {
                    CalldocError::DeclarationNotFound { .. } => report.missing_roots += 1,
                    _ => report.unparsable += 1,
                }
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.skipped_unresolved = self.memo.record_unresolved(&graph);

        let outcome = scheduler.traverse(&graph, &mut self.store, &mut self.memo).await?;
        report.merge(&outcome.report);

        if dry_run || !self.config.generation.write_docstrings {
            for edit in &outcome.edits {
                info!("Would write docstring for {}", edit.key);
            }
        } else {
            self.write_edits(outcome.edits, &mut report);
        }

        Ok(report)
    }

    /// Splice edits file by file; failures are counted, never fatal
    fn write_edits(&mut self, edits: Vec<DocstringEdit>, report: &mut RunReport) {
        let mut by_file: IndexMap<PathBuf, Vec<DocstringEdit>> = IndexMap::new();
        for edit in edits {
            by_file.entry(edit.key.file_path.clone()).or_default().push(edit);
        }

        for (path, edits) in by_file {
            match apply_file_edits(&mut self.index, &path, &edits) {
                Ok(splice) => {
                    if splice.changed {
                        info!("✍️  Updated {}", path.display());
                        report.files_written += 1;
                    }
                    report.splice_failures += splice.missing.len();
                }
                Err(e) => {
                    warn!("⚠️  {}", e);
                    report.splice_failures += 1;
                }
            }
        }
    }
}
