// src/core/scheduler.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::Result;
use super::{
    CallGraph, DocstringEdit, DocumentationSink, Fingerprint, FunctionKey, ProcessedRecord,
    ProcessedStore, RunReport, SinkError,
};

/// Artifacts and failures remembered across the roots of one run
#[derive(Debug, Clone, Default)]
pub struct RunMemo {
    pub artifacts: HashMap<Fingerprint, String>,
    /// Fingerprints whose generation failed; not retried until the next run
    pub failed: HashSet<Fingerprint>,
    /// `(caller, name)` calls already reported as unresolved
    pub unresolved: HashSet<(FunctionKey, String)>,
}

impl RunMemo {
    /// Remember the unresolved calls of `graph`, returning how many are new
    pub fn record_unresolved(&mut self, graph: &CallGraph) -> usize {
        graph
            .unresolved()
            .filter(|(caller, name)| self.unresolved.insert(((*caller).clone(), name.to_string())))
            .count()
    }
}

/// Everything one traversal produced
#[derive(Debug, Clone, Default)]
pub struct TraversalOutcome {
    pub report: RunReport,
    /// Keys sent to the sink, in dispatch order
    pub dispatch_order: Vec<FunctionKey>,
    /// Docstrings to splice, in the order they were produced
    pub edits: Vec<DocstringEdit>,
    /// Representatives chosen to break cycles
    pub broken_cycles: Vec<FunctionKey>,
}

/// One unit of work sent to the sink
struct Job {
    key: FunctionKey,
    fingerprint: Fingerprint,
    code: String,
    context: String,
    /// `(qualified name, code)` of methods documented before the class
    methods: Vec<(String, String)>,
    /// Other keys in the layer sharing this fingerprint
    shared_with: Vec<FunctionKey>,
}

#[derive(Debug)]
struct Generated {
    artifact: String,
    methods: Vec<(String, String)>,
    failed_methods: usize,
}

/// Leaves-first traversal of a call graph with bounded concurrent generation
pub struct TraversalScheduler {
    sink: Arc<dyn DocumentationSink>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    document_methods: bool,
}

impl TraversalScheduler {
    pub fn new(sink: Arc<dyn DocumentationSink>, config: &GenerationConfig) -> Self {
        Self {
            sink,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            timeout: Duration::from_secs(config.timeout_secs),
            document_methods: config.document_methods,
        }
    }

    /// Process every node of `graph`, callees before callers.
    ///
    /// Each layer is dispatched concurrently and fully collected before the
    /// next one is computed. Results are persisted on the calling task in
    /// layer order, and the store is flushed after every layer.
    pub async fn traverse(
        &self,
        graph: &CallGraph,
        store: &mut ProcessedStore,
        memo: &mut RunMemo,
    ) -> Result<TraversalOutcome> {
        let mut outcome = TraversalOutcome::default();
        let mut remaining: IndexSet<FunctionKey> = graph.keys().cloned().collect();

        while !remaining.is_empty() {
            let mut layer: Vec<FunctionKey> = remaining
                .iter()
                .filter(|key| !graph.callees(key).any(|c| remaining.contains(c)))
                .cloned()
                .collect();

            if layer.is_empty() {
                layer = self.break_cycles(graph, &remaining, &mut outcome);
            }
            layer.sort();

            for key in &layer {
                remaining.shift_remove(key);
            }
            self.process_layer(graph, &layer, store, memo, &mut outcome).await?;
            store.flush()?;
        }

        Ok(outcome)
    }

    /// Pick the smallest key of every terminal cycle as the next layer
    fn break_cycles(
        &self,
        graph: &CallGraph,
        remaining: &IndexSet<FunctionKey>,
        outcome: &mut TraversalOutcome,
    ) -> Vec<FunctionKey> {
        let mut representatives: Vec<FunctionKey> = graph
            .terminal_cycles(remaining)
            .into_iter()
            .filter_map(|component| component.into_iter().min())
            .collect();

        if representatives.is_empty() {
            representatives.extend(remaining.iter().min().cloned());
        }

        for representative in &representatives {
            info!("🔁 cycle broken at {}", representative);
            outcome.broken_cycles.push(representative.clone());
        }
        outcome.report.cycles_broken += representatives.len();
        representatives
    }

    async fn process_layer(
        &self,
        graph: &CallGraph,
        layer: &[FunctionKey],
        store: &mut ProcessedStore,
        memo: &mut RunMemo,
        outcome: &mut TraversalOutcome,
    ) -> Result<()> {
        let mut jobs: Vec<Job> = Vec::new();
        let mut job_by_fingerprint: HashMap<Fingerprint, usize> = HashMap::new();

        for key in layer {
            let Some(node) = graph.node(key) else {
                continue;
            };
            let declaration = &node.declaration;
            let fingerprint = &declaration.fingerprint;

            if memo.failed.contains(fingerprint) {
                debug!("{} failed earlier in this run, skipping", key);
                continue;
            }

            let known = memo
                .artifacts
                .get(fingerprint)
                .cloned()
                .or_else(|| store.get(fingerprint).map(|r| r.artifact_text.clone()));
            if let Some(artifact) = known {
                debug!("Reusing stored docstring for {}", key);
                outcome.report.cache_hits += 1;
                if declaration.docstring.is_none() {
                    outcome.edits.push(DocstringEdit::new(key.clone(), artifact.clone()));
                }
                memo.artifacts.insert(fingerprint.clone(), artifact);
                continue;
            }

            if let Some(&position) = job_by_fingerprint.get(fingerprint) {
                jobs[position].shared_with.push(key.clone());
                continue;
            }

            let methods = if declaration.is_class && self.document_methods {
                declaration
                    .methods
                    .iter()
                    .map(|m| (m.key.name.clone(), m.raw_text.clone()))
                    .collect()
            } else {
                Vec::new()
            };

            job_by_fingerprint.insert(fingerprint.clone(), jobs.len());
            jobs.push(Job {
                key: key.clone(),
                fingerprint: fingerprint.clone(),
                code: declaration.raw_text.clone(),
                context: child_context(graph, key, store, memo),
                methods,
                shared_with: Vec::new(),
            });
        }

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Dispatching layer of {} jobs", jobs.len());
        outcome.dispatch_order.extend(jobs.iter().map(|j| j.key.clone()));
        let results = self.dispatch(&jobs).await;

        for (job, result) in jobs.into_iter().zip(results) {
            match result {
                Ok(generated) => {
                    info!("📝 Documented {}", job.key);
                    store.put(ProcessedRecord::new(&job.key, job.fingerprint.clone(), generated.artifact.clone()));
                    outcome.report.processed += 1;
                    outcome.report.cache_hits += job.shared_with.len();
                    outcome.report.failed += generated.failed_methods;

                    for key in std::iter::once(&job.key).chain(job.shared_with.iter()) {
                        for (method, docstring) in &generated.methods {
                            outcome
                                .edits
                                .push(DocstringEdit::new(FunctionKey::new(&key.file_path, method.clone()), docstring.clone()));
                        }
                        outcome.edits.push(DocstringEdit::new(key.clone(), generated.artifact.clone()));
                    }
                    memo.artifacts.insert(job.fingerprint, generated.artifact);
                }
                Err(e) => {
                    warn!("⚠️  Failed to document {}: {}", job.key, e);
                    outcome.report.failed += 1 + job.shared_with.len();
                    memo.failed.insert(job.fingerprint);
                }
            }
        }

        Ok(())
    }

    /// Run every job concurrently, bounded by the semaphore.
    ///
    /// Results come back indexed like `jobs`; a task that panicked or was
    /// cancelled reports `SinkError::Aborted`.
    async fn dispatch(&self, jobs: &[Job]) -> Vec<std::result::Result<Generated, SinkError>> {
        let mut results: Vec<std::result::Result<Generated, SinkError>> = (0..jobs.len())
            .map(|_| Err(SinkError::Aborted("task did not complete".to_string())))
            .collect();

        let mut tasks = JoinSet::new();
        for (index, job) in jobs.iter().enumerate() {
            let sink = Arc::clone(&self.sink);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.timeout;
            let code = job.code.clone();
            let context = job.context.clone();
            let methods = job.methods.clone();

            tasks.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| SinkError::Aborted(e.to_string()))?;
                    generate_job(sink.as_ref(), timeout, &code, &context, &methods).await
                }
                .await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = result,
                Err(e) => warn!("Generation task aborted: {}", e),
            }
        }
        results
    }
}

/// Document a declaration, and its methods first when it is a class
async fn generate_job(
    sink: &dyn DocumentationSink,
    timeout: Duration,
    code: &str,
    context: &str,
    methods: &[(String, String)],
) -> std::result::Result<Generated, SinkError> {
    let mut documented = Vec::new();
    let mut failed_methods = 0;
    for (name, method_code) in methods {
        match generate_with_timeout(sink, timeout, method_code, "").await {
            Ok(docstring) => documented.push((name.clone(), docstring)),
            Err(e) => {
                warn!("⚠️  Failed to document method {}: {}", name, e);
                failed_methods += 1;
            }
        }
    }

    let mut entries: Vec<String> = Vec::new();
    if !context.is_empty() {
        entries.push(context.to_string());
    }
    entries.extend(documented.iter().map(|(name, doc)| context_entry(name, doc)));
    let full_context = entries.join("\n\n");

    let artifact = generate_with_timeout(sink, timeout, code, &full_context).await?;
    Ok(Generated {
        artifact,
        methods: documented,
        failed_methods,
    })
}

async fn generate_with_timeout(
    sink: &dyn DocumentationSink,
    timeout: Duration,
    code: &str,
    context: &str,
) -> std::result::Result<String, SinkError> {
    match tokio::time::timeout(timeout, sink.generate(code, context)).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout(timeout)),
    }
}

fn context_entry(name: &str, artifact: &str) -> String {
    format!("Function: {}\nDocstring: {}", name, artifact)
}

/// Documentation of the direct callees that already have an artifact
pub fn child_context(graph: &CallGraph, key: &FunctionKey, store: &ProcessedStore, memo: &RunMemo) -> String {
    let mut entries: Vec<String> = Vec::new();
    for callee in graph.callees(key).filter(|c| *c != key) {
        let Some(node) = graph.node(callee) else {
            continue;
        };
        let fingerprint = node.fingerprint();
        let artifact = memo
            .artifacts
            .get(fingerprint)
            .map(String::as_str)
            .or_else(|| store.get(fingerprint).map(|r| r.artifact_text.as_str()));
        if let Some(artifact) = artifact.filter(|a| !a.is_empty()) {
            entries.push(context_entry(&callee.name, artifact));
        }
    }
    entries.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{CallNode, Declaration};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String)>>,
        fail_on: Vec<String>,
        delay: Option<Duration>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DocumentationSink for RecordingSink {
        async fn generate(&self, code: &str, context: &str) -> std::result::Result<String, SinkError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push((code.to_string(), context.to_string()));
            let head = code.lines().next().unwrap_or_default().to_string();
            if self.fail_on.iter().any(|f| head.contains(f.as_str())) {
                return Err(SinkError::Request("boom".to_string()));
            }
            Ok(format!("Docs for {}", head.trim_end_matches(':')))
        }
    }

    impl RecordingSink {
        fn heads(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(code, _)| code.lines().next().unwrap_or_default().to_string())
                .collect()
        }

        fn context_for(&self, head: &str) -> String {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(code, _)| code.starts_with(head))
                .map(|(_, context)| context.clone())
                .unwrap_or_default()
        }
    }

    fn node(name: &str) -> CallNode {
        let raw_text = format!("def {}():\n    pass", name);
        CallNode {
            declaration: Declaration {
                key: FunctionKey::new("mod.py", name),
                span: 0..raw_text.len(),
                line_range: (1, 2),
                fingerprint: Fingerprint::of_text(&raw_text),
                raw_text,
                is_class: false,
                decorators: Vec::new(),
                docstring: None,
                anchor: None,
                calls: Vec::new(),
                methods: Vec::new(),
            },
            expanded: true,
        }
    }

    fn key(name: &str) -> FunctionKey {
        FunctionKey::new("mod.py", name)
    }

    fn graph(names: &[&str], edges: &[(&str, &str)]) -> CallGraph {
        let mut graph = CallGraph::with_root(key(names[0]));
        for name in names {
            graph.add_node(node(name));
        }
        for (caller, callee) in edges {
            graph.add_edge(&key(caller), &key(callee));
        }
        graph
    }

    fn scheduler(sink: Arc<RecordingSink>, configure: impl FnOnce(&mut GenerationConfig)) -> TraversalScheduler {
        let mut config = Config::default().generation;
        configure(&mut config);
        TraversalScheduler::new(sink, &config)
    }

    #[tokio::test]
    async fn callees_are_documented_before_callers() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(sink.clone(), |_| {});
        let g = graph(&["foo", "bar", "baz"], &[("foo", "bar"), ("foo", "baz"), ("bar", "baz")]);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();

        assert_eq!(outcome.dispatch_order, vec![key("baz"), key("bar"), key("foo")]);
        assert_eq!(sink.context_for("def baz"), "");
        assert_eq!(sink.context_for("def bar"), "Function: baz\nDocstring: Docs for def baz()");
        assert_eq!(
            sink.context_for("def foo"),
            "Function: bar\nDocstring: Docs for def bar()\n\nFunction: baz\nDocstring: Docs for def baz()"
        );
        assert_eq!(outcome.report.processed, 3);
        assert_eq!(store.len(), 3);
        assert_eq!(outcome.edits.len(), 3);
    }

    #[tokio::test]
    async fn stored_artifacts_are_not_regenerated() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(sink.clone(), |_| {});
        let g = graph(&["foo", "bar"], &[("foo", "bar")]);
        let mut store = ProcessedStore::in_memory();

        scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(sink.heads().len(), 2);

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(sink.heads().len(), 2);
        assert_eq!(outcome.report.cache_hits, 2);
        assert_eq!(outcome.report.processed, 0);
    }

    #[tokio::test]
    async fn cycle_is_broken_at_the_smallest_key() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(sink.clone(), |_| {});
        let g = graph(&["b", "a", "top"], &[("top", "b"), ("b", "a"), ("a", "b")]);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();

        assert_eq!(outcome.broken_cycles, vec![key("a")]);
        assert_eq!(outcome.report.cycles_broken, 1);
        assert_eq!(outcome.dispatch_order, vec![key("a"), key("b"), key("top")]);
        assert_eq!(sink.context_for("def a"), "");
        assert_eq!(sink.context_for("def b"), "Function: a\nDocstring: Docs for def a()");
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn self_recursive_node_terminates() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(sink.clone(), |_| {});
        let g = graph(&["fact"], &[("fact", "fact")]);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(outcome.report.cycles_broken, 1);
        assert_eq!(sink.context_for("def fact"), "");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_not_persisted() {
        let sink = Arc::new(RecordingSink {
            fail_on: vec!["def x".to_string()],
            ..RecordingSink::default()
        });
        let scheduler = scheduler(sink.clone(), |_| {});
        let g = graph(&["top", "x", "y", "z"], &[("top", "x"), ("top", "y"), ("top", "z")]);
        let mut store = ProcessedStore::in_memory();
        let mut memo = RunMemo::default();

        let outcome = scheduler.traverse(&g, &mut store, &mut memo).await.unwrap();

        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.report.processed, 3);
        assert!(!store.exists(&g.node(&key("x")).unwrap().declaration.fingerprint));
        assert!(memo.failed.contains(&g.node(&key("x")).unwrap().declaration.fingerprint));
        assert_eq!(
            sink.context_for("def top"),
            "Function: y\nDocstring: Docs for def y()\n\nFunction: z\nDocstring: Docs for def z()"
        );

        // Not retried within the same run
        let before = sink.heads().len();
        scheduler.traverse(&g, &mut store, &mut memo).await.unwrap();
        assert_eq!(sink.heads().len(), before);

        // Retried on the next run
        scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(sink.heads().len(), before + 1);
    }

    #[tokio::test]
    async fn slow_generation_times_out_as_failure() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_secs(3)),
            ..RecordingSink::default()
        });
        let scheduler = scheduler(sink.clone(), |c| c.timeout_secs = 1);
        let g = graph(&["slow"], &[]);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(outcome.report.failed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(50)),
            ..RecordingSink::default()
        });
        let scheduler = scheduler(sink.clone(), |c| c.concurrency = 2);
        let g = graph(&["a", "b", "c", "d", "e", "f"], &[]);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(outcome.report.processed, 6);
        assert!(sink.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_methods_count_without_failing_the_class() {
        let sink = Arc::new(RecordingSink {
            fail_on: vec!["def broken".to_string()],
            ..RecordingSink::default()
        });
        let scheduler = scheduler(sink.clone(), |c| c.document_methods = true);

        let mut class = node("Greeter");
        class.declaration.raw_text = "class Greeter:\n    def hello(self):\n        pass".to_string();
        class.declaration.is_class = true;
        for method in ["hello", "broken"] {
            let mut declaration = node(method).declaration;
            declaration.key = key(&format!("Greeter.{}", method));
            declaration.raw_text = format!("def {}(self):\n        pass", method);
            class.declaration.methods.push(declaration);
        }
        let mut g = CallGraph::new();
        g.add_node(class);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(outcome.report.processed, 1);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(
            sink.context_for("class Greeter"),
            "Function: Greeter.hello\nDocstring: Docs for def hello(self)"
        );
        let edited: Vec<_> = outcome.edits.iter().map(|e| e.key.name.as_str()).collect();
        assert_eq!(edited, vec!["Greeter.hello", "Greeter"]);
    }

    #[test]
    fn unresolved_calls_are_counted_once_per_run() {
        let mut first = graph(&["a", "b"], &[("a", "b")]);
        first.add_unresolved(&key("b"), "print");
        let mut second = graph(&["c", "b"], &[("c", "b")]);
        second.add_unresolved(&key("b"), "print");
        second.add_unresolved(&key("c"), "print");

        let mut memo = RunMemo::default();
        assert_eq!(memo.record_unresolved(&first), 1);
        assert_eq!(memo.record_unresolved(&second), 1);
        assert_eq!(RunMemo::default().record_unresolved(&second), 2);
    }

    #[tokio::test]
    async fn identical_bodies_are_generated_once() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(sink.clone(), |_| {});
        let mut g = CallGraph::new();
        let first = node("dup");
        let mut second = node("dup");
        second.declaration.key = FunctionKey::new("other.py", "dup");
        g.add_node(first);
        g.add_node(second);
        let mut store = ProcessedStore::in_memory();

        let outcome = scheduler.traverse(&g, &mut store, &mut RunMemo::default()).await.unwrap();
        assert_eq!(sink.heads().len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(outcome.edits.len(), 2);
        assert_eq!(outcome.report.cache_hits, 1);
    }
}
