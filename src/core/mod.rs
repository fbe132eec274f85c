// src/core/mod.rs
mod engine;
mod parser;
mod scheduler;
mod splicer;
mod store;
mod llm;

// Call graph construction and entry points
mod call_graph;

// Language-specific parsers
mod languages;

pub use parser::{
    BodyAnchor, CallSite, Declaration, DocstringSpan, Fingerprint, FunctionKey, ImportEntry,
    ImportKind, ImportTable, ParsedSource, ParsedUnit, SourceIndex,
};
pub use languages::{LanguageParser, PythonParser};
pub use store::{ProcessedRecord, ProcessedStore};
pub use splicer::{apply_file_edits, render_docstring, splice_source, DocstringEdit, FileSplice};
pub use scheduler::{child_context, RunMemo, TraversalOutcome, TraversalScheduler};
pub use llm::{clean_docstring, create_sink, DocumentationSink, LlmSink, SinkError};

pub use call_graph::{
    CallGraph, CallGraphBuilder, CallNode, EntryPoint, EntryPointProvider, EntryPointScan,
    EntryPointType,
    ExplicitEntryPoints, FileEntryPoints, Resolution, Resolver, RouteEntryPoints,
};

// Export the main engine
pub use engine::{Engine, RunReport, StoreStatus};
