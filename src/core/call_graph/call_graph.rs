// src/core/call_graph/call_graph.rs
use std::collections::HashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::super::{Declaration, Fingerprint, FunctionKey};

/// Node in the call graph representing a function or class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNode {
    pub declaration: Declaration,
    /// False when the node was already processed and its callees were not explored
    pub expanded: bool,
}

impl CallNode {
    pub fn key(&self) -> &FunctionKey {
        &self.declaration.key
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.declaration.fingerprint
    }
}

/// Directed caller -> callee graph for one traversal root.
///
/// Nodes, successors and unresolved callees all keep insertion order, which
/// makes traversal order and child context deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallGraph {
    root: Option<FunctionKey>,
    nodes: IndexMap<FunctionKey, CallNode>,
    successors: IndexMap<FunctionKey, IndexSet<FunctionKey>>,
    /// Callee names with no defining file, per caller
    unresolved: IndexMap<FunctionKey, IndexSet<String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: FunctionKey) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    pub fn root(&self) -> Option<&FunctionKey> {
        self.root.as_ref()
    }

    /// Add a node; an existing node with the same key is kept
    pub fn add_node(&mut self, node: CallNode) -> bool {
        let key = node.key().clone();
        if self.nodes.contains_key(&key) {
            return false;
        }
        self.nodes.insert(key, node);
        true
    }

    /// Add a caller -> callee edge; duplicates are ignored
    pub fn add_edge(&mut self, caller: &FunctionKey, callee: &FunctionKey) -> bool {
        self.successors
            .entry(caller.clone())
            .or_default()
            .insert(callee.clone())
    }

    /// Record a call that could not be resolved to a file
    pub fn add_unresolved(&mut self, caller: &FunctionKey, callee_name: &str) -> bool {
        self.unresolved
            .entry(caller.clone())
            .or_default()
            .insert(callee_name.to_string())
    }

    pub fn node(&self, key: &FunctionKey) -> Option<&CallNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &FunctionKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &CallNode> {
        self.nodes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FunctionKey> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Methods this node calls, in edge-insertion order
    pub fn callees(&self, key: &FunctionKey) -> impl Iterator<Item = &FunctionKey> {
        self.successors.get(key).into_iter().flatten()
    }

    pub fn out_degree(&self, key: &FunctionKey) -> usize {
        self.successors.get(key).map_or(0, |s| s.len())
    }

    pub fn edge_count(&self) -> usize {
        self.successors.values().map(|s| s.len()).sum()
    }

    pub fn unresolved_calls(&self, key: &FunctionKey) -> impl Iterator<Item = &str> {
        self.unresolved.get(key).into_iter().flatten().map(|s| s.as_str())
    }

    /// Every `(caller, unresolved name)` pair, grouped by caller
    pub fn unresolved(&self) -> impl Iterator<Item = (&FunctionKey, &str)> {
        self.unresolved
            .iter()
            .flat_map(|(caller, names)| names.iter().map(move |name| (caller, name.as_str())))
    }

    /// Number of dangling caller -> unresolved-name edges
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.values().map(|s| s.len()).sum()
    }

    /// Strongly connected components of the subgraph induced by `within`.
    ///
    /// Tarjan's algorithm; components come out in reverse topological order
    /// and members keep discovery order.
    pub fn strongly_connected_components(&self, within: &IndexSet<FunctionKey>) -> Vec<Vec<FunctionKey>> {
        let mut state = TarjanState::default();
        for key in within {
            if !state.index.contains_key(key) {
                self.strongconnect(key, within, &mut state);
            }
        }
        state.components
    }

    fn strongconnect<'a>(
        &'a self,
        key: &'a FunctionKey,
        within: &IndexSet<FunctionKey>,
        state: &mut TarjanState<'a>,
    ) {
        state.index.insert(key, state.counter);
        state.lowlink.insert(key, state.counter);
        state.counter += 1;
        state.stack.push(key);
        state.on_stack.insert(key, true);

        for callee in self.callees(key).filter(|c| within.contains(*c)) {
            if !state.index.contains_key(callee) {
                self.strongconnect(callee, within, state);
                let low = state.lowlink[key].min(state.lowlink[callee]);
                state.lowlink.insert(key, low);
            } else if state.on_stack.get(callee).copied().unwrap_or(false) {
                let low = state.lowlink[key].min(state.index[callee]);
                state.lowlink.insert(key, low);
            }
        }

        if state.lowlink[key] == state.index[key] {
            let mut component = Vec::new();
            while let Some(member) = state.stack.pop() {
                state.on_stack.insert(member, false);
                component.push(member.clone());
                if member == key {
                    break;
                }
            }
            component.reverse();
            state.components.push(component);
        }
    }

    /// Components of `within` with no edge to a node of `within` outside themselves
    /// and at least one internal edge (a cycle, including a self-call)
    pub fn terminal_cycles(&self, within: &IndexSet<FunctionKey>) -> Vec<Vec<FunctionKey>> {
        self.strongly_connected_components(within)
            .into_iter()
            .filter(|component| {
                let members: IndexSet<&FunctionKey> = component.iter().collect();
                let leaves_component = component.iter().any(|key| {
                    self.callees(key)
                        .any(|c| within.contains(c) && !members.contains(c))
                });
                let cyclic = component.len() > 1
                    || component.iter().any(|key| self.callees(key).any(|c| c == key));
                !leaves_component && cyclic
            })
            .collect()
    }
}

#[derive(Default)]
struct TarjanState<'a> {
    counter: usize,
    index: HashMap<&'a FunctionKey, usize>,
    lowlink: HashMap<&'a FunctionKey, usize>,
    on_stack: HashMap<&'a FunctionKey, bool>,
    stack: Vec<&'a FunctionKey>,
    components: Vec<Vec<FunctionKey>>,
}
