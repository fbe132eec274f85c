// src/core/call_graph/mod.rs
//! Static call graph construction
//!
//! Calls found by the parser are resolved to their defining files through
//! imports, then followed depth-first from each entry point.

mod builder;
mod call_graph;
mod entry_point_detector;
mod resolver;

pub use builder::CallGraphBuilder;
pub use call_graph::{CallGraph, CallNode};
pub use entry_point_detector::{
    EntryPoint, EntryPointProvider, EntryPointScan, EntryPointType, ExplicitEntryPoints, FileEntryPoints,
    RouteEntryPoints,
};
pub use resolver::{Resolution, Resolver};
