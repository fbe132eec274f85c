// src/core/call_graph/resolver.rs
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::Result;
use super::super::{ImportEntry, SourceIndex};

/// Outcome of resolving a callee name from a calling file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Declared in the calling file itself
    ResolvedLocal,
    /// Declared in another file reached through an import
    ResolvedCrossFile(PathBuf),
    /// No defining file could be determined
    Unresolved,
}

impl Resolution {
    /// Defining file, given the caller's file
    pub fn file<'a>(&'a self, caller_file: &'a Path) -> Option<&'a Path> {
        match self {
            Resolution::ResolvedLocal => Some(caller_file),
            Resolution::ResolvedCrossFile(path) => Some(path.as_path()),
            Resolution::Unresolved => None,
        }
    }
}

/// Heuristic, import-driven name resolution.
///
/// Only plain `import a.b` and `from a.b import c` entries are followed.
/// Wildcard, relative and aliased imports always yield `Unresolved`.
pub struct Resolver {
    root: PathBuf,
    extension: String,
}

impl Resolver {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            root: config.root.clone(),
            extension: config.source_extension.clone(),
        }
    }

    /// Map `callee_name`, called from `caller_file`, to its defining file
    pub fn resolve(&self, index: &mut SourceIndex, caller_file: &Path, callee_name: &str) -> Result<Resolution> {
        let caller = index.parse(caller_file)?;
        if caller.declares(callee_name) {
            return Ok(Resolution::ResolvedLocal);
        }

        for entry in caller.imports.iter().filter(|e| e.is_resolvable()) {
            for candidate in self.candidate_files(entry) {
                if !candidate.is_file() {
                    continue;
                }
                match index.parse(&candidate) {
                    Ok(parsed) if parsed.declares(callee_name) => {
                        debug!(
                            "Resolved {} from {} via `{}` -> {}",
                            callee_name,
                            caller_file.display(),
                            entry.module,
                            candidate.display()
                        );
                        return Ok(Resolution::ResolvedCrossFile(parsed.path.clone()));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Skipping import candidate {}: {}", candidate.display(), e),
                }
            }
        }

        Ok(Resolution::Unresolved)
    }

    /// `a.b` -> `<root>/a/b.<ext>`, then `<root>/a/b/__init__.<ext>`
    fn candidate_files(&self, entry: &ImportEntry) -> [PathBuf; 2] {
        let module_path = entry.module.replace('.', "/");
        [
            self.root.join(format!("{}.{}", module_path, self.extension)),
            self.root
                .join(&module_path)
                .join(format!("__init__.{}", self.extension)),
        ]
    }
}
