// src/core/call_graph/entry_point_detector.rs
use std::path::{Path, PathBuf};
use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{EntryPointConfig, ProjectConfig};
use crate::error::{CalldocError, Result};
use super::super::SourceIndex;

/// A root the traversal starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub file: PathBuf,
    pub function: String,
    pub entry_type: EntryPointType,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPointType {
    /// Named on the command line
    Explicit,
    /// Every top-level declaration of a file
    Module,
    /// HTTP endpoint found through its route decorator
    Route,
}

/// Roots found by a provider, plus the files it had to skip
#[derive(Debug, Clone, Default)]
pub struct EntryPointScan {
    pub entry_points: Vec<EntryPoint>,
    /// Files that could not be parsed
    pub unparsable: Vec<PathBuf>,
}

impl EntryPointScan {
    /// Record a file that failed to parse and move on
    fn skip(&mut self, file: &Path, error: &CalldocError) {
        warn!("⚠️  Skipping {}: {}", file.display(), error);
        self.unparsable.push(file.to_path_buf());
    }
}

/// Source of traversal roots.
///
/// A file that does not parse is reported in the scan, never as an error.
pub trait EntryPointProvider {
    fn list_entry_points(&self, index: &mut SourceIndex) -> Result<EntryPointScan>;
}

/// Fixed `(file, function)` pairs
pub struct ExplicitEntryPoints {
    roots: Vec<(PathBuf, String)>,
}

impl ExplicitEntryPoints {
    pub fn new(roots: Vec<(PathBuf, String)>) -> Self {
        Self { roots }
    }

    pub fn single(file: impl Into<PathBuf>, function: impl Into<String>) -> Self {
        Self::new(vec![(file.into(), function.into())])
    }
}

impl EntryPointProvider for ExplicitEntryPoints {
    fn list_entry_points(&self, _index: &mut SourceIndex) -> Result<EntryPointScan> {
        let entry_points = self
            .roots
            .iter()
            .map(|(file, function)| EntryPoint {
                file: file.clone(),
                function: function.clone(),
                entry_type: EntryPointType::Explicit,
                reasoning: "Requested explicitly".to_string(),
            })
            .collect();
        Ok(EntryPointScan {
            entry_points,
            unparsable: Vec::new(),
        })
    }
}

/// Every top-level declaration of the given files, in source order
pub struct FileEntryPoints {
    files: Vec<PathBuf>,
}

impl FileEntryPoints {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

impl EntryPointProvider for FileEntryPoints {
    fn list_entry_points(&self, index: &mut SourceIndex) -> Result<EntryPointScan> {
        let mut scan = EntryPointScan::default();
        for file in &self.files {
            let parsed = match index.parse(file) {
                Ok(parsed) => parsed,
                Err(e) => {
                    scan.skip(file, &e);
                    continue;
                }
            };
            scan.entry_points.extend(parsed.declarations.iter().map(|declaration| EntryPoint {
                file: file.clone(),
                function: declaration.key.name.clone(),
                entry_type: EntryPointType::Module,
                reasoning: format!("Top-level declaration of {}", file.display()),
            }));
        }
        Ok(scan)
    }
}

/// Functions under a directory whose decorators match a route pattern
pub struct RouteEntryPoints {
    dir: PathBuf,
    extension: String,
    patterns: Vec<Regex>,
}

impl RouteEntryPoints {
    pub fn new(dir: impl Into<PathBuf>, project: &ProjectConfig, config: &EntryPointConfig) -> Result<Self> {
        let patterns = config
            .route_decorators
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    CalldocError::Config(format!("invalid route decorator pattern `{}`: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dir: dir.into(),
            extension: project.source_extension.clone(),
            patterns,
        })
    }

    fn route_decorator<'d>(&self, decorators: &'d [String]) -> Option<&'d str> {
        decorators
            .iter()
            .find(|d| self.patterns.iter().any(|p| p.is_match(d)))
            .map(String::as_str)
    }

    fn source_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        // Respect .gitignore and .ignore files, even outside a git checkout
        let walker = WalkBuilder::new(&self.dir)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| CalldocError::Config(e.to_string()))?;
            let path = entry.path();
            if path.is_file() && has_extension(path, &self.extension) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl EntryPointProvider for RouteEntryPoints {
    fn list_entry_points(&self, index: &mut SourceIndex) -> Result<EntryPointScan> {
        let mut scan = EntryPointScan::default();

        for file in self.source_files()? {
            let parsed = match index.parse(&file) {
                Ok(parsed) => parsed,
                Err(e) => {
                    scan.skip(&file, &e);
                    continue;
                }
            };

            for declaration in parsed.declarations.iter().filter(|d| !d.is_class) {
                if let Some(decorator) = self.route_decorator(&declaration.decorators) {
                    debug!("Route {} in {} via @{}", declaration.key.name, file.display(), decorator);
                    scan.entry_points.push(EntryPoint {
                        file: file.clone(),
                        function: declaration.key.name.clone(),
                        entry_type: EntryPointType::Route,
                        reasoning: format!("Decorated with @{}", decorator),
                    });
                }
            }
        }

        Ok(scan)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::prelude::*;

    fn index() -> SourceIndex {
        SourceIndex::new(&Config::default().project).unwrap()
    }

    #[test]
    fn explicit_roots_are_returned_as_given() {
        let provider = ExplicitEntryPoints::single("a.py", "foo");
        let roots = provider.list_entry_points(&mut index()).unwrap().entry_points;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].function, "foo");
        assert_eq!(roots[0].entry_type, EntryPointType::Explicit);
    }

    #[test]
    fn file_roots_cover_every_top_level_declaration() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("a.py");
        file.write_str("def foo():\n    pass\n\nclass Bar:\n    def baz(self):\n        pass\n\nasync def qux():\n    pass\n")
            .unwrap();

        let provider = FileEntryPoints::new(vec![file.path().to_path_buf()]);
        let names: Vec<_> = provider
            .list_entry_points(&mut index())
            .unwrap()
            .entry_points
            .into_iter()
            .map(|e| e.function)
            .collect();
        assert_eq!(names, vec!["foo", "Bar", "qux"]);
    }

    #[test]
    fn unparsable_files_are_skipped_not_fatal() {
        let temp = assert_fs::TempDir::new().unwrap();
        let bad = temp.child("bad.py");
        bad.write_str("def nope(:\n").unwrap();
        let good = temp.child("good.py");
        good.write_str("def ok():\n    return 1\n").unwrap();

        let provider = FileEntryPoints::new(vec![bad.path().to_path_buf(), good.path().to_path_buf()]);
        let scan = provider.list_entry_points(&mut index()).unwrap();

        assert_eq!(scan.unparsable, vec![bad.path().to_path_buf()]);
        let names: Vec<_> = scan.entry_points.iter().map(|e| e.function.as_str()).collect();
        assert_eq!(names, vec!["ok"]);
    }

    #[test]
    fn routes_are_found_by_decorator() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("app.py")
            .write_str(concat!(
                "from flask import Flask\napp = Flask(__name__)\n\n",
                "@app.route('/users')\ndef users():\n    return load()\n\n",
                "@cache\ndef load():\n    return []\n\n",
                "@app.get('/health')\ndef health():\n    return 'ok'\n",
            ))
            .unwrap();
        temp.child("broken.py").write_str("def nope(:\n").unwrap();
        temp.child("venv/lib.py")
            .write_str("@app.route('/hidden')\ndef hidden():\n    pass\n")
            .unwrap();
        temp.child(".gitignore").write_str("venv/\n").unwrap();

        let config = Config::default();
        let provider = RouteEntryPoints::new(temp.path(), &config.project, &config.entry_points).unwrap();
        let scan = provider.list_entry_points(&mut index()).unwrap();
        assert_eq!(scan.unparsable, vec![temp.child("broken.py").path().to_path_buf()]);
        let routes = scan.entry_points;

        let names: Vec<_> = routes.iter().map(|e| e.function.as_str()).collect();
        assert_eq!(names, vec!["users", "health"]);
        assert!(routes.iter().all(|e| e.entry_type == EntryPointType::Route));
        assert_eq!(routes[0].reasoning, "Decorated with @app.route('/users')");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let mut config = Config::default();
        config.entry_points.route_decorators = vec!["(".to_string()];
        let result = RouteEntryPoints::new(".", &config.project, &config.entry_points);
        assert!(matches!(result, Err(CalldocError::Config(_))));
    }
}
