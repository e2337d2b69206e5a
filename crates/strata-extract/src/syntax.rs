//! Offline structural extraction with tree-sitter.
//!
//! Types become members (struct/class → class, trait/interface → interface,
//! enum → enum) and the functions declared on them become methods. Summaries
//! come from doc comments and docstrings; when a declaration has none, a short
//! description is synthesized from its name and location.

use std::collections::HashMap;

use async_trait::async_trait;
use strata_core::{MemberKind, StrataError};
use tree_sitter::{Node, Parser};

use crate::extractor::{ExtractedMember, ExtractedMethod, StructuralExtractor};

/// Programming language detected from a file extension.
///
/// # Examples
///
/// ```
/// use strata_extract::syntax::Language;
///
/// assert_eq!(Language::from_path("src/lib.rs"), Some(Language::Rust));
/// assert_eq!(Language::from_path("web/App.TSX"), Some(Language::Tsx));
/// assert_eq!(Language::from_path("notes.md"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Java,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Language::Rust),
            "py" | "pyi" => Some(Language::Python),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "go" => Some(Language::Go),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    /// Detect language from a `/`-separated path.
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(&ext.to_ascii_lowercase())
    }

    /// The tree-sitter grammar for this language.
    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }
}

/// Structural extractor backed by tree-sitter grammars.
///
/// Supports Rust, Python, TypeScript, JavaScript, Go and Java. Needs no
/// network access, which makes it the default extractor.
///
/// # Examples
///
/// ```
/// use strata_extract::syntax::SyntaxExtractor;
///
/// let members = SyntaxExtractor::new()
///     .extract_sync("class Foo:\n    \"\"\"Holds foo.\"\"\"\n", "foo.py")
///     .unwrap();
/// assert_eq!(members[0].name, "Foo");
/// assert_eq!(members[0].summary, "Holds foo.");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxExtractor;

impl SyntaxExtractor {
    /// Create a new syntax extractor.
    pub fn new() -> Self {
        Self
    }

    /// Parse `content` and return its members in declaration order.
    ///
    /// Unsupported paths yield an empty list. Tree-sitter is error-tolerant,
    /// so files with syntax errors still produce partial results.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Extraction`] if the grammar cannot be loaded or
    /// the parser gives up.
    pub fn extract_sync(
        &self,
        content: &str,
        path: &str,
    ) -> Result<Vec<ExtractedMember>, StrataError> {
        let Some(language) = Language::from_path(path) else {
            return Ok(Vec::new());
        };

        let mut parser = Parser::new();
        parser
            .set_language(&language.tree_sitter_language())
            .map_err(|e| StrataError::Extraction(format!("failed to set language: {e}")))?;

        let Some(tree) = parser.parse(content, None) else {
            return Err(StrataError::Extraction(format!("failed to parse {path}")));
        };

        let mut collector = Collector::new(content.as_bytes(), path);
        let root = tree.root_node();
        match language {
            Language::Rust => collector.collect_rust(root),
            Language::Python => collector.collect_python(root),
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                collector.collect_js_ts(root);
            }
            Language::Go => collector.collect_go(root),
            Language::Java => collector.collect_java(root),
        }
        Ok(collector.finish())
    }
}

#[async_trait]
impl StructuralExtractor for SyntaxExtractor {
    fn supports(&self, path: &str) -> bool {
        Language::from_path(path).is_some()
    }

    async fn extract(
        &self,
        content: &str,
        path: &str,
    ) -> Result<Vec<ExtractedMember>, StrataError> {
        self.extract_sync(content, path)
    }
}

/// Accumulates members while walking one syntax tree.
///
/// Methods declared apart from their type (Rust `impl` blocks, Go receivers)
/// are parked in `detached` and attached by owner name in [`Collector::finish`].
struct Collector<'a> {
    source: &'a [u8],
    path: &'a str,
    members: Vec<ExtractedMember>,
    detached: Vec<(String, ExtractedMethod)>,
}

impl<'a> Collector<'a> {
    fn new(source: &'a [u8], path: &'a str) -> Self {
        Self {
            source,
            path,
            members: Vec::new(),
            detached: Vec::new(),
        }
    }

    fn push_member(
        &mut self,
        kind: MemberKind,
        name: String,
        summary: Option<String>,
        methods: Vec<ExtractedMethod>,
    ) {
        self.members.push(ExtractedMember {
            kind,
            name,
            summary: summary.unwrap_or_default(),
            methods,
        });
    }

    fn method(&self, node: Node, owner: &str) -> Option<ExtractedMethod> {
        let name = field_text(node, "name", self.source)?;
        let summary = leading_doc(node, self.source)
            .unwrap_or_else(|| format!("Method {name} of {owner}."));
        Some(ExtractedMethod { name, summary })
    }

    fn body_methods(&self, node: Node, owner: &str, kinds: &[&str]) -> Vec<ExtractedMethod> {
        let Some(body) = node.child_by_field_name("body") else {
            return Vec::new();
        };
        let mut methods = Vec::new();
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            if kinds.contains(&child.kind()) {
                methods.extend(self.method(child, owner));
            }
        }
        methods
    }

    fn finish(mut self) -> Vec<ExtractedMember> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, member) in self.members.iter().enumerate() {
            index.entry(member.name.clone()).or_insert(i);
        }

        for (owner, method) in std::mem::take(&mut self.detached) {
            let idx = match index.get(&owner) {
                Some(&i) => i,
                None => {
                    self.members.push(ExtractedMember {
                        kind: MemberKind::Class,
                        name: owner.clone(),
                        summary: String::new(),
                        methods: Vec::new(),
                    });
                    let i = self.members.len() - 1;
                    index.insert(owner, i);
                    i
                }
            };
            self.members[idx].methods.push(method);
        }

        for member in &mut self.members {
            if member.summary.is_empty() {
                member.summary = describe_member(member, self.path);
            }
        }
        self.members
    }

    fn collect_rust(&mut self, node: Node) {
        match node.kind() {
            "struct_item" | "union_item" | "enum_item" | "trait_item" => {
                if let Some(name) = field_text(node, "name", self.source) {
                    let kind = match node.kind() {
                        "enum_item" => MemberKind::Enum,
                        "trait_item" => MemberKind::Interface,
                        _ => MemberKind::Class,
                    };
                    let methods = if kind == MemberKind::Interface {
                        self.body_methods(node, &name, &["function_signature_item", "function_item"])
                    } else {
                        Vec::new()
                    };
                    let summary = leading_doc(node, self.source);
                    self.push_member(kind, name, summary, methods);
                }
                return;
            }
            "impl_item" => {
                let owner = node
                    .child_by_field_name("type")
                    .and_then(|t| find_descendant(t, "type_identifier"))
                    .map(|t| node_text(t, self.source));
                if let Some(owner) = owner {
                    for method in self.body_methods(node, &owner, &["function_item"]) {
                        self.detached.push((owner.clone(), method));
                    }
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_rust(child);
        }
    }

    fn collect_python(&mut self, node: Node) {
        if node.kind() == "class_definition" {
            if let Some(name) = field_text(node, "name", self.source) {
                let bases = node
                    .child_by_field_name("superclasses")
                    .map(|s| node_text(s, self.source))
                    .unwrap_or_default();
                let kind = if bases.contains("Enum") {
                    MemberKind::Enum
                } else if bases.contains("ABC") || bases.contains("Protocol") {
                    MemberKind::Interface
                } else {
                    MemberKind::Class
                };

                let body = node.child_by_field_name("body");
                let summary = body
                    .and_then(|b| python_docstring(b, self.source))
                    .or_else(|| leading_doc(node, self.source));

                let mut methods = Vec::new();
                if let Some(body) = body {
                    let mut cursor = body.walk();
                    for child in body.named_children(&mut cursor) {
                        let def = match child.kind() {
                            "function_definition" => Some(child),
                            "decorated_definition" => child
                                .child_by_field_name("definition")
                                .filter(|d| d.kind() == "function_definition"),
                            _ => None,
                        };
                        if let Some(def) = def {
                            methods.extend(self.python_method(def, &name));
                        }
                    }
                }
                self.push_member(kind, name, summary, methods);
            }
            return;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_python(child);
        }
    }

    fn python_method(&self, def: Node, owner: &str) -> Option<ExtractedMethod> {
        let name = field_text(def, "name", self.source)?;
        let summary = def
            .child_by_field_name("body")
            .and_then(|b| python_docstring(b, self.source))
            .or_else(|| leading_doc(def, self.source))
            .unwrap_or_else(|| format!("Method {name} of {owner}."));
        Some(ExtractedMethod { name, summary })
    }

    fn collect_js_ts(&mut self, node: Node) {
        let kind = match node.kind() {
            "class_declaration" | "abstract_class_declaration" => Some(MemberKind::Class),
            "interface_declaration" => Some(MemberKind::Interface),
            "enum_declaration" => Some(MemberKind::Enum),
            _ => None,
        };

        if let Some(kind) = kind {
            if let Some(name) = field_text(node, "name", self.source) {
                let methods = match kind {
                    MemberKind::Class => self.body_methods(
                        node,
                        &name,
                        &["method_definition", "abstract_method_signature"],
                    ),
                    MemberKind::Interface => {
                        self.body_methods(node, &name, &["method_signature"])
                    }
                    MemberKind::Enum => Vec::new(),
                };
                let summary = leading_doc(node, self.source).or_else(|| {
                    node.parent()
                        .filter(|p| p.kind() == "export_statement")
                        .and_then(|p| leading_doc(p, self.source))
                });
                self.push_member(kind, name, summary, methods);
            }
            return;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_js_ts(child);
        }
    }

    fn collect_java(&mut self, node: Node) {
        let kind = match node.kind() {
            "class_declaration" | "record_declaration" => Some(MemberKind::Class),
            "interface_declaration" => Some(MemberKind::Interface),
            "enum_declaration" => Some(MemberKind::Enum),
            _ => None,
        };

        if let Some(kind) = kind {
            if let Some(name) = field_text(node, "name", self.source) {
                const METHOD_KINDS: &[&str] = &["method_declaration", "constructor_declaration"];
                let mut methods = self.body_methods(node, &name, METHOD_KINDS);
                // Enum methods live after the constants.
                if let Some(body) = node.child_by_field_name("body") {
                    let mut cursor = body.walk();
                    for child in body.named_children(&mut cursor) {
                        if child.kind() == "enum_body_declarations" {
                            let mut inner = child.walk();
                            for decl in child.named_children(&mut inner) {
                                if METHOD_KINDS.contains(&decl.kind()) {
                                    methods.extend(self.method(decl, &name));
                                }
                            }
                        }
                    }
                }
                let summary = leading_doc(node, self.source);
                self.push_member(kind, name, summary, methods);
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_java(child);
        }
    }

    fn collect_go(&mut self, node: Node) {
        match node.kind() {
            "type_declaration" => {
                let mut cursor = node.walk();
                for spec in node.named_children(&mut cursor) {
                    if spec.kind() != "type_spec" {
                        continue;
                    }
                    let Some(name) = field_text(spec, "name", self.source) else {
                        continue;
                    };
                    let Some(ty) = spec.child_by_field_name("type") else {
                        continue;
                    };
                    let summary = leading_doc(spec, self.source)
                        .or_else(|| leading_doc(node, self.source));
                    match ty.kind() {
                        "struct_type" => {
                            self.push_member(MemberKind::Class, name, summary, Vec::new());
                        }
                        "interface_type" => {
                            let mut methods = Vec::new();
                            let mut inner = ty.walk();
                            for elem in ty.named_children(&mut inner) {
                                if matches!(elem.kind(), "method_elem" | "method_spec") {
                                    methods.extend(self.method(elem, &name));
                                }
                            }
                            self.push_member(MemberKind::Interface, name, summary, methods);
                        }
                        _ => {}
                    }
                }
                return;
            }
            "method_declaration" => {
                let owner = node
                    .child_by_field_name("receiver")
                    .and_then(|r| find_descendant(r, "type_identifier"))
                    .map(|t| node_text(t, self.source));
                if let Some(owner) = owner {
                    if let Some(method) = self.method(node, &owner) {
                        self.detached.push((owner, method));
                    }
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.collect_go(child);
        }
    }
}

fn describe_member(member: &ExtractedMember, path: &str) -> String {
    let kind = match member.kind {
        MemberKind::Class => "Class",
        MemberKind::Interface => "Interface",
        MemberKind::Enum => "Enum",
    };
    if member.methods.is_empty() {
        format!("{kind} {} declared in {path}.", member.name)
    } else {
        format!(
            "{kind} {} declared in {path} with methods {}.",
            member.name,
            member.method_names().join(", ")
        )
    }
}

/// Comments directly above `node`, skipping attributes and decorators.
fn leading_doc(node: Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        let kind = sibling.kind();
        if kind == "attribute_item" || kind == "decorator" {
            expected_row = sibling.start_position().row;
            current = sibling.prev_sibling();
            continue;
        }
        if !kind.contains("comment") || sibling.end_position().row + 1 < expected_row {
            break;
        }
        lines.push(node_text(sibling, source));
        expected_row = sibling.start_position().row;
        current = sibling.prev_sibling();
    }

    lines.reverse();
    clean_comment(&lines.join("\n"))
}

fn clean_comment(raw: &str) -> Option<String> {
    const MARKERS: [&str; 7] = ["/**", "/*!", "/*", "///", "//!", "//", "#"];

    let mut parts = Vec::new();
    for line in raw.lines() {
        let mut line = line.trim();
        if let Some(rest) = MARKERS.iter().find_map(|m| line.strip_prefix(m)) {
            line = rest;
        }
        let line = line.trim_end_matches("*/").trim();
        let line = line.strip_prefix('*').unwrap_or(line).trim();
        if line.is_empty() || line.starts_with('@') {
            continue;
        }
        parts.push(line);
    }
    non_empty(parts.join(" "))
}

/// The string literal opening a Python block, if any.
fn python_docstring(body: Node, source: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    let literal = match first.kind() {
        "string" => first,
        "expression_statement" => first.named_child(0).filter(|n| n.kind() == "string")?,
        _ => return None,
    };
    let text = node_text(literal, source);
    let text = text.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    let text = text.trim_matches('"').trim_matches('\'');
    non_empty(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

fn node_text(node: Node, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= source.len() || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).to_string()
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source))
        .and_then(non_empty)
}

fn find_descendant<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    if node.kind() == kind {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(found) = find_descendant(child, kind) {
            return Some(found);
        }
    }
    None
}
