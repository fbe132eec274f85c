// src/core/call_graph/builder.rs
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{CalldocError, Result};
use super::super::{Declaration, FunctionKey, ProcessedStore, SourceIndex};
use super::{CallGraph, CallNode, Resolution, Resolver};

/// Builds a call graph from one root function, following calls across files
pub struct CallGraphBuilder<'a> {
    index: &'a mut SourceIndex,
    resolver: &'a Resolver,
    store: &'a ProcessedStore,
}

impl<'a> CallGraphBuilder<'a> {
    pub fn new(index: &'a mut SourceIndex, resolver: &'a Resolver, store: &'a ProcessedStore) -> Self {
        Self { index, resolver, store }
    }

    /// Depth-first expansion from `root_function` declared in `root_file`.
    ///
    /// Nodes whose fingerprint is already stored are added without exploring
    /// their callees. Each key is expanded at most once, so cycles terminate.
    pub fn build(&mut self, root_file: &Path, root_function: &str) -> Result<CallGraph> {
        let root = self.lookup(root_file, root_function)?.ok_or_else(|| {
            CalldocError::DeclarationNotFound {
                path: root_file.to_path_buf(),
                name: root_function.to_string(),
            }
        })?;

        let mut graph = CallGraph::with_root(root.key.clone());
        let mut visited: HashSet<FunctionKey> = HashSet::new();
        let mut stack: Vec<Declaration> = vec![root];

        while let Some(declaration) = stack.pop() {
            let key = declaration.key.clone();
            if !visited.insert(key.clone()) {
                continue;
            }

            let cached = self.store.exists(&declaration.fingerprint);
            let calls = declaration.calls.clone();
            graph.add_node(CallNode {
                declaration,
                expanded: !cached,
            });
            if cached {
                debug!("{} already processed, not expanding", key);
                continue;
            }

            let mut pending = Vec::new();
            for call in &calls {
                match self.resolver.resolve(self.index, &key.file_path, &call.name)? {
                    Resolution::Unresolved => {
                        debug!("Unresolved call {} from {}", call.name, key);
                        graph.add_unresolved(&key, &call.name);
                    }
                    resolution => {
                        let Some(file) = resolution.file(&key.file_path).map(Path::to_path_buf) else {
                            continue;
                        };
                        let Some(callee) = self.lookup(&file, &call.name)? else {
                            graph.add_unresolved(&key, &call.name);
                            continue;
                        };
                        // A class instantiating itself from a method is not recursion
                        if callee.key == key && callee.is_class {
                            continue;
                        }
                        graph.add_edge(&key, &callee.key);
                        if !visited.contains(&callee.key) {
                            pending.push(callee);
                        }
                    }
                }
            }

            // Reverse so the first call site is explored first
            stack.extend(pending.into_iter().rev());
        }

        info!(
            "🔗 Built call graph for {}: {} nodes, {} edges, {} unresolved",
            graph.root().map(|k| k.to_string()).unwrap_or_default(),
            graph.len(),
            graph.edge_count(),
            graph.unresolved_count()
        );
        Ok(graph)
    }

    fn lookup(&mut self, file: &Path, name: &str) -> Result<Option<Declaration>> {
        let parsed = self.index.parse(file)?;
        Ok(parsed.declaration(name).cloned())
    }
}
