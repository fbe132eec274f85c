// src/core/splicer.rs
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CalldocError, Result};
use super::{Declaration, FunctionKey, ParsedSource, SourceIndex};

/// A docstring to write into the declaration identified by `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocstringEdit {
    /// File plus top-level name or `Class.method`
    pub key: FunctionKey,
    pub docstring: String,
}

impl DocstringEdit {
    pub fn new(key: FunctionKey, docstring: impl Into<String>) -> Self {
        Self {
            key,
            docstring: docstring.into(),
        }
    }
}

/// Result of splicing one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSplice {
    /// Whether the file content changed on disk
    pub changed: bool,
    /// Edits whose target was no longer declared in the file
    pub missing: Vec<String>,
}

/// Render docstring text as a triple-quoted literal for a body at `indent`.
///
/// Backslashes and embedded triple quotes are escaped so the literal reads
/// back as `text`. Continuation lines are indented to the body and the
/// closing quotes go on their own line; a single line stays on one line.
pub fn render_docstring(text: &str, indent: &str) -> String {
    let escaped = text
        .trim()
        .replace('\\', "\\\\")
        .replace("\"\"\"", "\\\"\\\"\\\"");
    let mut lines = escaped.lines().map(str::trim_end);
    let first = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();

    if rest.is_empty() {
        let pad = if first.ends_with('"') { " " } else { "" };
        return format!("\"\"\"{}{}\"\"\"", first, pad);
    }

    let mut rendered = format!("\"\"\"{}\n", first);
    for line in rest {
        if !line.is_empty() {
            rendered.push_str(indent);
            rendered.push_str(line);
        }
        rendered.push('\n');
    }
    rendered.push_str(indent);
    rendered.push_str("\"\"\"");
    rendered
}

/// Byte range to replace and its replacement for one declaration
fn plan_edit(declaration: &Declaration, docstring: &str) -> Option<(Range<usize>, String)> {
    let anchor = declaration.anchor.as_ref()?;
    let rendered = render_docstring(docstring, &anchor.indent);

    if let Some(existing) = &declaration.docstring {
        return Some((existing.range.clone(), rendered));
    }

    let at = anchor.insert_at;
    let insertion = if anchor.inline {
        format!("\n{}{}\n{}", anchor.indent, rendered, anchor.indent)
    } else {
        format!("{}{}\n", anchor.indent, rendered)
    };
    Some((at..at, insertion))
}

/// Apply edits to an in-memory parse, returning the new source text.
///
/// Targets that are not declared in `parsed` are reported in the second
/// element and left untouched.
pub fn splice_source(parsed: &ParsedSource, edits: &[DocstringEdit]) -> (String, Vec<String>) {
    // Last edit per target wins
    let mut by_target: IndexMap<&str, &str> = IndexMap::new();
    for edit in edits {
        by_target.insert(edit.key.name.as_str(), edit.docstring.as_str());
    }

    let mut missing = Vec::new();
    let mut planned: Vec<(Range<usize>, String)> = Vec::new();
    for (name, docstring) in by_target {
        match parsed.find_qualified(name).and_then(|d| plan_edit(d, docstring)) {
            Some(plan) => planned.push(plan),
            None => missing.push(name.to_string()),
        }
    }

    // Back to front so earlier offsets stay valid
    planned.sort_by(|a, b| b.0.start.cmp(&a.0.start));

    let mut source = parsed.source.clone();
    let mut floor = usize::MAX;
    for (range, replacement) in planned {
        if range.end > floor {
            continue;
        }
        source.replace_range(range.clone(), &replacement);
        floor = range.start;
    }
    (source, missing)
}

/// Splice every edit for `path` into the file and write it back atomically.
///
/// The file is re-parsed first so offsets reflect its current content; the
/// cached parse is dropped afterwards.
pub fn apply_file_edits(index: &mut SourceIndex, path: &Path, edits: &[DocstringEdit]) -> Result<FileSplice> {
    let splice_error = |reason: String| CalldocError::Splice {
        path: path.to_path_buf(),
        reason,
    };

    let parsed = index.reload(path).map_err(|e| splice_error(e.to_string()))?;
    let (updated, missing) = splice_source(&parsed, edits);
    for name in &missing {
        warn!("⚠️  {} no longer declares {}, docstring not written", path.display(), name);
    }

    if updated == parsed.source {
        debug!("{} unchanged after splicing", path.display());
        return Ok(FileSplice { changed: false, missing });
    }

    write_atomically(path, &updated).map_err(|e| splice_error(e.to_string()))?;
    index.invalidate(path);
    debug!("Spliced {} docstrings into {}", edits.len() - missing.len(), path.display());
    Ok(FileSplice { changed: true, missing })
}

fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(content.as_bytes())?;
    temp.flush()?;
    if let Ok(metadata) = std::fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn index() -> SourceIndex {
        SourceIndex::new(&Config::default().project).unwrap()
    }

    fn splice_file(content: &str, edits: &[(&str, &str)]) -> (String, FileSplice) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, content).unwrap();
        let edits: Vec<_> = edits
            .iter()
            .map(|(name, doc)| DocstringEdit::new(FunctionKey::new(&path, *name), *doc))
            .collect();
        let outcome = apply_file_edits(&mut index(), &path, &edits).unwrap();
        (std::fs::read_to_string(&path).unwrap(), outcome)
    }

    #[test]
    fn renders_single_and_multi_line_docstrings() {
        assert_eq!(render_docstring("Adds numbers.", "    "), "\"\"\"Adds numbers.\"\"\"");
        assert_eq!(
            render_docstring("Adds numbers.\n\nArgs:\n    a: first", "    "),
            "\"\"\"Adds numbers.\n\n    Args:\n        a: first\n    \"\"\""
        );
        assert_eq!(render_docstring("Says \"hi\"", ""), "\"\"\"Says \"hi\" \"\"\"");
        assert_eq!(render_docstring("a \"\"\" b", ""), "\"\"\"a \\\"\\\"\\\" b\"\"\"");
    }

    #[test]
    fn backslashes_are_escaped() {
        assert_eq!(render_docstring("Joins with \\n", ""), "\"\"\"Joins with \\\\n\"\"\"");
        assert_eq!(render_docstring("Ends in \\", ""), "\"\"\"Ends in \\\\\"\"\"");
    }

    #[test]
    fn spliced_backslashes_still_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "def join(parts):\n    return '\\\\'.join(parts)\n").unwrap();
        let edits = vec![DocstringEdit::new(
            FunctionKey::new(&path, "join"),
            "Joins with a trailing \\",
        )];
        let mut index = index();

        assert!(apply_file_edits(&mut index, &path, &edits).unwrap().changed);
        let reparsed = index.reload(&path).unwrap();
        let doc = reparsed.declaration("join").unwrap().docstring.clone().unwrap();
        assert_eq!(doc.text, "Joins with a trailing \\\\");
    }

    #[test]
    fn inserts_before_first_statement() {
        let (content, outcome) = splice_file(
            "import os\n\ndef foo(x):\n    return x\n\n# trailing\n",
            &[("foo", "Returns x.")],
        );
        assert!(outcome.changed);
        assert_eq!(
            content,
            "import os\n\ndef foo(x):\n    \"\"\"Returns x.\"\"\"\n    return x\n\n# trailing\n"
        );
    }

    #[test]
    fn replaces_existing_docstring_only() {
        let (content, _) = splice_file(
            "def foo():\n    'old'\n    return 1\n",
            &[("foo", "New docs.\n\nReturns:\n    int: one")],
        );
        assert_eq!(
            content,
            "def foo():\n    \"\"\"New docs.\n\n    Returns:\n        int: one\n    \"\"\"\n    return 1\n"
        );
    }

    #[test]
    fn inline_body_moves_to_its_own_line() {
        let (content, _) = splice_file("def one(): return 1\n", &[("one", "One.")]);
        assert_eq!(content, "def one(): \n    \"\"\"One.\"\"\"\n    return 1\n");
    }

    #[test]
    fn class_and_method_edits_apply_together() {
        let (content, _) = splice_file(
            "class Greeter:\n    def hello(self):\n        print('hi')\n",
            &[("Greeter.hello", "Prints a greeting."), ("Greeter", "Greets people.")],
        );
        assert_eq!(
            content,
            "class Greeter:\n    \"\"\"Greets people.\"\"\"\n    def hello(self):\n        \"\"\"Prints a greeting.\"\"\"\n        print('hi')\n"
        );
    }

    #[test]
    fn splicing_twice_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "def foo():\n    return bar()\n").unwrap();
        let edits = vec![DocstringEdit::new(
            FunctionKey::new(&path, "foo"),
            "Calls bar.\n\nReturns:\n    The result of bar.",
        )];
        let mut index = index();

        assert!(apply_file_edits(&mut index, &path, &edits).unwrap().changed);
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(!apply_file_edits(&mut index, &path, &edits).unwrap().changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn missing_targets_are_reported_and_others_applied() {
        let (content, outcome) = splice_file(
            "def foo():\n    pass\n",
            &[("gone", "Nope."), ("foo", "Foo.")],
        );
        assert_eq!(outcome.missing, vec!["gone".to_string()]);
        assert!(content.contains("\"\"\"Foo.\"\"\""));
    }

    #[test]
    fn unparsable_file_is_a_splice_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "def foo(:\n").unwrap();
        let edits = vec![DocstringEdit::new(FunctionKey::new(&path, "foo"), "x")];
        let err = apply_file_edits(&mut index(), &path, &edits).unwrap_err();
        assert!(matches!(err, CalldocError::Splice { .. }));
    }
}
