use std::collections::HashSet;
use std::path::Path;
use tree_sitter::{Node, Parser};

use crate::error::{CalldocError, Result};
use super::super::parser::{
    BodyAnchor, CallSite, Declaration, DocstringSpan, Fingerprint, FunctionKey, ImportEntry,
    ImportKind, ImportTable, ParsedUnit,
};
use super::LanguageParser;

/// Python-specific parser using Tree-sitter
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let python_language = tree_sitter_python::language();
        parser.set_language(&python_language)
            .map_err(|e| CalldocError::Config(format!("Failed to set Python language: {}", e)))?;

        Ok(Self { parser })
    }
}

impl LanguageParser for PythonParser {
    fn parse(&mut self, content: &str, file_path: &Path) -> Result<ParsedUnit> {
        let tree = self.parser.parse(content, None)
            .ok_or_else(|| CalldocError::parse(file_path, "tree-sitter returned no tree"))?;

        let root_node = tree.root_node();
        if root_node.has_error() {
            let line = first_error_line(root_node).unwrap_or(0);
            return Err(CalldocError::parse(
                file_path,
                format!("syntax error near line {}", line),
            ));
        }

        let mut unit = ParsedUnit::default();
        let mut cursor = root_node.walk();
        for child in root_node.named_children(&mut cursor) {
            let (definition, decorators) = match child.kind() {
                "function_definition" | "class_definition" => (child, Vec::new()),
                "decorated_definition" => match child.child_by_field_name("definition") {
                    Some(definition) => (definition, decorator_texts(child, content)),
                    None => continue,
                },
                _ => continue,
            };
            if let Some(declaration) = self.parse_definition(definition, decorators, content, file_path, None) {
                unit.declarations.push(declaration);
            }
        }

        unit.imports = extract_imports(root_node, content);
        Ok(unit)
    }

    fn file_extensions(&self) -> &[&str] {
        &["py"]
    }
}

impl PythonParser {
    /// Build a declaration for a `def` or `class` node
    fn parse_definition(
        &self,
        node: Node,
        decorators: Vec<String>,
        source: &str,
        file_path: &Path,
        parent_class: Option<&str>,
    ) -> Option<Declaration> {
        let name = node_text(node.child_by_field_name("name")?, source).to_string();
        let body = node.child_by_field_name("body")?;
        let is_class = node.kind() == "class_definition";

        let qualified = match parent_class {
            Some(class) => format!("{}.{}", class, name),
            None => name.clone(),
        };

        // Methods only one level down
        let methods = if is_class && parent_class.is_none() {
            self.parse_methods(body, source, file_path, &name)
        } else {
            Vec::new()
        };

        let docstring = leading_docstring(body, source);
        let span = node.byte_range();
        let raw_text = source[span.clone()].to_string();
        let fingerprint = Fingerprint::of_text(&canonical_text(node, source));

        Some(Declaration {
            key: FunctionKey::new(file_path, qualified),
            line_range: line_range(node),
            raw_text,
            span,
            is_class,
            decorators,
            docstring,
            anchor: body_anchor(node, body, source),
            calls: collect_calls(node, source),
            methods,
            fingerprint,
        })
    }

    fn parse_methods(&self, body: Node, source: &str, file_path: &Path, class_name: &str) -> Vec<Declaration> {
        let mut methods = Vec::new();
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            let (definition, decorators) = match child.kind() {
                "function_definition" => (child, Vec::new()),
                "decorated_definition" => match child.child_by_field_name("definition") {
                    Some(definition) if definition.kind() == "function_definition" => {
                        (definition, decorator_texts(child, source))
                    }
                    _ => continue,
                },
                _ => continue,
            };
            if let Some(method) = self.parse_definition(definition, decorators, source, file_path, Some(class_name)) {
                methods.push(method);
            }
        }
        methods
    }
}

/// Extract text content of a node
fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

/// 1-based inclusive line range; a trailing newline does not count as a line
fn line_range(node: Node) -> (usize, usize) {
    let start = node.start_position();
    let end = node.end_position();
    let end_line = if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    };
    (start.row + 1, end_line)
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().filter(|c| c.has_error()).find_map(first_error_line)
}

fn decorator_texts(decorated: Node, source: &str) -> Vec<String> {
    let mut cursor = decorated.walk();
    decorated
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .map(|c| node_text(c, source).trim_start_matches('@').trim().to_string())
        .collect()
}

/// First statement of a block, skipping comments
fn first_statement(body: Node) -> Option<Node> {
    let mut cursor = body.walk();
    let first = body.named_children(&mut cursor).find(|c| c.kind() != "comment");
    first
}

/// The expression statement holding a block's docstring, if it has one
fn docstring_statement(body: Node) -> Option<Node> {
    let statement = first_statement(body)?;
    if statement.kind() != "expression_statement" || statement.named_child_count() != 1 {
        return None;
    }
    let string = statement.named_child(0)?;
    (string.kind() == "string").then_some(statement)
}

fn leading_docstring(body: Node, source: &str) -> Option<DocstringSpan> {
    let string = docstring_statement(body)?.named_child(0)?;
    Some(DocstringSpan {
        range: string.byte_range(),
        text: unquote(node_text(string, source)).to_string(),
    })
}

/// Strip string prefix letters and the surrounding quotes
fn unquote(literal: &str) -> &str {
    let body = literal.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            return &body[quote.len()..body.len() - quote.len()];
        }
    }
    body
}

/// Text hashed into a declaration's fingerprint.
///
/// The header, then every body statement on its own line with its exact
/// text. The leading docstring statement is left out and a class's methods
/// are rendered the same way, so writing docstrings (and moving an inline
/// body below its header) keeps the result stable. Any other edit,
/// indentation and string contents included, changes it.
fn canonical_text(node: Node, source: &str) -> String {
    let Some(body) = node.child_by_field_name("body") else {
        return node_text(node, source).to_string();
    };
    let is_class = node.kind() == "class_definition";
    let docstring = docstring_statement(body).map(|s| s.id());

    let mut canonical = source[node.start_byte()..body.start_byte()].trim_end().to_string();
    let mut cursor = body.walk();
    for statement in body.named_children(&mut cursor) {
        if Some(statement.id()) == docstring {
            continue;
        }
        canonical.push('\n');
        match statement.kind() {
            "function_definition" if is_class => canonical.push_str(&canonical_text(statement, source)),
            "decorated_definition" if is_class => {
                let mut decorators = statement.walk();
                for decorator in statement.named_children(&mut decorators).filter(|c| c.kind() == "decorator") {
                    canonical.push_str(node_text(decorator, source));
                    canonical.push('\n');
                }
                match statement.child_by_field_name("definition") {
                    Some(definition) => canonical.push_str(&canonical_text(definition, source)),
                    None => canonical.push_str(node_text(statement, source)),
                }
            }
            _ => canonical.push_str(node_text(statement, source)),
        }
    }
    canonical
}

fn leading_whitespace(line: &str) -> &str {
    let end = line.len() - line.trim_start_matches(|c: char| c == ' ' || c == '\t').len();
    &line[..end]
}

fn line_start(source: &str, offset: usize) -> usize {
    source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

fn body_anchor(definition: Node, body: Node, source: &str) -> Option<BodyAnchor> {
    let statement = first_statement(body)?;
    let start = statement.start_byte();
    let line_begin = line_start(source, start);
    let prefix = &source[line_begin..start];

    if prefix.chars().all(|c| c == ' ' || c == '\t') {
        return Some(BodyAnchor {
            insert_at: line_begin,
            indent: prefix.to_string(),
            inline: false,
        });
    }

    let def_line = &source[line_start(source, definition.start_byte())..];
    Some(BodyAnchor {
        insert_at: start,
        indent: format!("{}    ", leading_whitespace(def_line)),
        inline: true,
    })
}

/// Names of everything called inside `node`.
///
/// `foo()` yields `foo`; `obj.method()` yields `obj`. Anything else (chained
/// attributes, subscripts, calls on call results) is skipped.
fn collect_calls(node: Node, source: &str) -> Vec<CallSite> {
    let mut calls = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![node];

    while let Some(current) = stack.pop() {
        if current.kind() == "call" {
            if let Some(name) = current.child_by_field_name("function").and_then(|f| callee_name(f, source)) {
                if seen.insert(name.to_string()) {
                    calls.push(CallSite {
                        name: name.to_string(),
                        line: current.start_position().row + 1,
                    });
                }
            }
        }

        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        // Reverse so the stack pops in source order
        stack.extend(children.into_iter().rev());
    }

    calls
}

fn callee_name<'a>(function: Node, source: &'a str) -> Option<&'a str> {
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "attribute" => {
            let object = function.child_by_field_name("object")?;
            (object.kind() == "identifier").then(|| node_text(object, source))
        }
        _ => None,
    }
}

fn extract_imports(root: Node, source: &str) -> ImportTable {
    let mut table = ImportTable::default();
    let mut stack = vec![root];

    while let Some(current) = stack.pop() {
        match current.kind() {
            "import_statement" => table.entries.extend(plain_imports(current, source)),
            "import_from_statement" => {
                if let Some(entry) = from_import(current, source) {
                    table.entries.push(entry);
                }
            }
            _ => {
                let mut cursor = current.walk();
                let children: Vec<Node> = current.named_children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }

    table
}

fn plain_imports(statement: Node, source: &str) -> Vec<ImportEntry> {
    let line = statement.start_position().row + 1;
    let mut cursor = statement.walk();
    statement
        .children_by_field_name("name", &mut cursor)
        .filter_map(|name| match name.kind() {
            "dotted_name" => Some(ImportEntry {
                module: node_text(name, source).to_string(),
                kind: ImportKind::Module,
                names: Vec::new(),
                alias: None,
                line,
            }),
            "aliased_import" => Some(ImportEntry {
                module: node_text(name.child_by_field_name("name")?, source).to_string(),
                kind: ImportKind::Aliased,
                names: Vec::new(),
                alias: name.child_by_field_name("alias").map(|a| node_text(a, source).to_string()),
                line,
            }),
            _ => None,
        })
        .collect()
}

fn from_import(statement: Node, source: &str) -> Option<ImportEntry> {
    let module_node = statement.child_by_field_name("module_name")?;
    let module = node_text(module_node, source).to_string();

    let mut cursor = statement.walk();
    let is_wildcard = statement
        .named_children(&mut cursor)
        .any(|c| c.kind() == "wildcard_import");

    let kind = if module_node.kind() == "relative_import" {
        ImportKind::Relative
    } else if is_wildcard {
        ImportKind::Wildcard
    } else {
        ImportKind::From
    };

    let mut cursor = statement.walk();
    let names = statement
        .children_by_field_name("name", &mut cursor)
        .filter_map(|name| match name.kind() {
            "dotted_name" => Some(node_text(name, source).to_string()),
            "aliased_import" => name
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string()),
            _ => None,
        })
        .collect();

    Some(ImportEntry {
        module,
        kind,
        names,
        alias: None,
        line: statement.start_position().row + 1,
    })
}
