use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::{CalldocError, Result};
use super::languages::{LanguageParser, PythonParser};

/// Identity of a unit of work: the defining file plus the declared name.
///
/// Ordering is lexicographic on the file path, then on the name; the
/// scheduler relies on it to pick cycle representatives deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub file_path: PathBuf,
    pub name: String,
}

impl FunctionKey {
    pub fn new(file_path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.file_path.display(), self.name)
    }
}

/// Content hash used as the cache key and change-detection token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of `text`
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of an existing leading docstring (the string literal node)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocstringSpan {
    pub range: Range<usize>,
    /// Text between the quotes
    pub text: String,
}

/// Where a new docstring goes when the declaration has none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyAnchor {
    /// Byte offset of the insertion point
    pub insert_at: usize,
    /// Indentation of the body statements
    pub indent: String,
    /// Body starts on the `def`/`class` line (`def f(): return 1`)
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Bare callee name, or the base identifier of an attribute call
    pub name: String,
    /// 1-based line of the call
    pub line: usize,
}

/// A top-level function or class (or a method, one level down)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    pub key: FunctionKey,

    /// Byte span of the definition, decorators excluded
    pub span: Range<usize>,

    /// 1-based inclusive line range
    pub line_range: (usize, usize),

    /// Exact source slice for `span`
    pub raw_text: String,

    pub is_class: bool,

    /// Decorator expressions without the leading `@`
    pub decorators: Vec<String>,

    pub docstring: Option<DocstringSpan>,

    pub anchor: Option<BodyAnchor>,

    /// Calls made anywhere inside the definition, first occurrence order
    pub calls: Vec<CallSite>,

    /// Methods of a class; keys are qualified as `Class.method`
    pub methods: Vec<Declaration>,

    pub fingerprint: Fingerprint,
}

impl Declaration {
    /// Unqualified name (`method` for `Class.method`)
    pub fn short_name(&self) -> &str {
        self.key
            .name
            .rsplit_once('.')
            .map(|(_, short)| short)
            .unwrap_or(&self.key.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportKind {
    /// `import a.b`
    Module,
    /// `from a.b import c`
    From,
    /// `from a.b import *`
    Wildcard,
    /// `from .a import b`
    Relative,
    /// `import a.b as c`
    Aliased,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Dotted module path as written (leading dots kept for relative imports)
    pub module: String,
    pub kind: ImportKind,
    /// Names imported by a `from` statement
    pub names: Vec<String>,
    pub alias: Option<String>,
    pub line: usize,
}

impl ImportEntry {
    /// Whether the resolver may follow this import to a file
    pub fn is_resolvable(&self) -> bool {
        matches!(self.kind, ImportKind::Module | ImportKind::From)
    }
}

/// Imports of a single file, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTable {
    pub entries: Vec<ImportEntry>,
}

impl ImportTable {
    pub fn iter(&self) -> impl Iterator<Item = &ImportEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of a language parser for one file
#[derive(Debug, Clone, Default)]
pub struct ParsedUnit {
    pub declarations: Vec<Declaration>,
    pub imports: ImportTable,
}

/// Represents a parsed source file with extracted declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSource {
    /// File path as it was requested
    pub path: PathBuf,

    /// Programming language detected
    pub language: String,

    /// Top-level declarations in source order
    pub declarations: Vec<Declaration>,

    pub imports: ImportTable,

    /// Raw source content
    pub source: String,
}

impl ParsedSource {
    /// Top-level declaration by name
    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.key.name == name)
    }

    /// Top-level declaration or `Class.method`
    pub fn find_qualified(&self, qualified: &str) -> Option<&Declaration> {
        match qualified.split_once('.') {
            Some((class, _)) => self
                .declaration(class)?
                .methods
                .iter()
                .find(|m| m.key.name == qualified),
            None => self.declaration(qualified),
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declaration(name).is_some()
    }
}

/// Absolute form of `path` with `.` and `..` components resolved lexically
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Per-path cache of parsed files, delegating to language-specific parsers
pub struct SourceIndex {
    max_file_size: usize,
    language_parsers: HashMap<String, Box<dyn LanguageParser>>,
    cache: HashMap<PathBuf, Arc<ParsedSource>>,
}

impl SourceIndex {
    pub fn new(config: &ProjectConfig) -> Result<Self> {
        let mut language_parsers: HashMap<String, Box<dyn LanguageParser>> = HashMap::new();
        language_parsers.insert("python".to_string(), Box::new(PythonParser::new()?));

        Ok(Self {
            max_file_size: config.max_file_size,
            language_parsers,
            cache: HashMap::new(),
        })
    }

    /// Parse a file, or return the cached parse.
    ///
    /// The path is normalized first, so keys built from the parse agree no
    /// matter how the file was named.
    pub fn parse<P: AsRef<Path>>(&mut self, file_path: P) -> Result<Arc<ParsedSource>> {
        let path = normalize_path(file_path.as_ref());
        let path = path.as_path();
        if let Some(parsed) = self.cache.get(path) {
            return Ok(parsed.clone());
        }

        let parsed = Arc::new(self.parse_uncached(path)?);
        debug!(
            "Parsed {} ({} declarations, {} imports)",
            path.display(),
            parsed.declarations.len(),
            parsed.imports.len()
        );
        self.cache.insert(path.to_path_buf(), parsed.clone());
        Ok(parsed)
    }

    /// Drop the cached parse so the next `parse` reads the file again
    pub fn invalidate<P: AsRef<Path>>(&mut self, file_path: P) {
        self.cache.remove(&normalize_path(file_path.as_ref()));
    }

    /// Re-read a file regardless of the cache
    pub fn reload<P: AsRef<Path>>(&mut self, file_path: P) -> Result<Arc<ParsedSource>> {
        self.invalidate(&file_path);
        self.parse(file_path)
    }

    fn parse_uncached(&mut self, path: &Path) -> Result<ParsedSource> {
        let language = self
            .detect_language(path)
            .ok_or_else(|| CalldocError::parse(path, "unsupported file extension"))?;

        let source = std::fs::read_to_string(path)
            .map_err(|e| CalldocError::parse(path, e.to_string()))?;

        if source.len() > self.max_file_size {
            return Err(CalldocError::parse(
                path,
                format!("file exceeds maximum size of {} bytes", self.max_file_size),
            ));
        }

        let parser = self
            .language_parsers
            .get_mut(&language)
            .ok_or_else(|| CalldocError::parse(path, format!("no parser for {}", language)))?;
        let unit = parser.parse(&source, path)?;

        Ok(ParsedSource {
            path: path.to_path_buf(),
            language,
            declarations: unit.declarations,
            imports: unit.imports,
            source,
        })
    }

    /// Detect programming language from file path
    fn detect_language(&self, path: &Path) -> Option<String> {
        let extension = path.extension().and_then(|ext| ext.to_str())?;
        self.language_parsers
            .iter()
            .find(|(_, parser)| parser.file_extensions().contains(&extension))
            .map(|(lang, _)| lang.clone())
    }
}
