use std::collections::HashSet;

use tree_sitter::{Node, Query, QueryCursor, StreamingIterator};

use super::chunker::ChunkKind;
use super::languages::Language;

/// A top-level definition located in a syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub kind: ChunkKind,
    pub name: String,
    pub parent: Option<String>,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

enum Scope {
    TopLevel,
    Member(String),
    Nested,
}

/// Run the definition query and keep top-level functions, class members
/// and top-level classes. Definitions nested inside function bodies are
/// part of their enclosing chunk.
pub fn extract_definitions(
    lang: Language,
    query: &Query,
    root: Node<'_>,
    source: &[u8],
) -> Vec<Definition> {
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, source);
    let mut seen = HashSet::new();
    let mut defs = Vec::new();

    while let Some(m) = matches.next() {
        let mut main_node = None;
        let mut capture = "";
        let mut symbol = None;

        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => symbol = cap.node.utf8_text(source).ok(),
                c @ ("function" | "method" | "class") => {
                    main_node = Some(cap.node);
                    capture = c;
                }
                _ => {}
            }
        }

        let (Some(node), Some(symbol)) = (main_node, symbol) else {
            continue;
        };

        let (kind, name, parent) = match (capture, enclosing_scope(lang, node, source)) {
            ("class", Scope::TopLevel) => (ChunkKind::Class, symbol.to_string(), None),
            ("function", Scope::TopLevel) => {
                let kind = if lang.is_js_family() && is_pascal_case(symbol) {
                    ChunkKind::Component
                } else {
                    ChunkKind::Function
                };
                (kind, symbol.to_string(), None)
            }
            ("function" | "method", Scope::Member(class)) => (
                ChunkKind::Function,
                format!("{class}.{symbol}"),
                Some(class),
            ),
            // Go methods sit at top level and name their type in the receiver.
            ("method", Scope::TopLevel) if lang == Language::Go => {
                match go_receiver_type(node, source) {
                    Some(recv) => (ChunkKind::Function, format!("{recv}.{symbol}"), Some(recv)),
                    None => (ChunkKind::Function, symbol.to_string(), None),
                }
            }
            _ => continue,
        };

        // Python decorators belong to the definition they wrap.
        let span = match node.parent() {
            Some(p) if p.kind() == "decorated_definition" => p,
            _ => node,
        };

        if !seen.insert((span.start_byte(), span.end_byte(), name.clone())) {
            continue;
        }

        defs.push(Definition {
            kind,
            name,
            parent,
            start_byte: span.start_byte(),
            end_byte: span.end_byte(),
            start_line: span.start_position().row + 1,
            end_line: span.end_position().row + 1,
        });
    }

    defs.sort_by(|a, b| (a.start_byte, &a.name).cmp(&(b.start_byte, &b.name)));
    defs
}

fn enclosing_scope(lang: Language, node: Node<'_>, source: &[u8]) -> Scope {
    let mut class = None;
    let mut parent = node.parent();
    while let Some(p) = parent {
        let kind = p.kind();
        if lang.function_kinds().contains(&kind) {
            return Scope::Nested;
        }
        if lang.class_kinds().contains(&kind) {
            if class.is_some() {
                return Scope::Nested;
            }
            match class_name(p, source) {
                Some(name) => class = Some(name),
                None => return Scope::Nested,
            }
        }
        parent = p.parent();
    }
    match class {
        Some(name) => Scope::Member(name),
        None => Scope::TopLevel,
    }
}

fn class_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    // Rust impl blocks are named by their self type.
    let name_node = if node.kind() == "impl_item" {
        node.child_by_field_name("type")?
    } else {
        node.child_by_field_name("name")?
    };
    let text = name_node.utf8_text(source).ok()?;
    Some(strip_generics(text).to_string())
}

fn go_receiver_type(node: Node<'_>, source: &[u8]) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?.utf8_text(source).ok()?;
    let inner = receiver.trim().trim_start_matches('(').trim_end_matches(')');
    let ty = inner.split_whitespace().last()?.trim_start_matches('*');
    let ty = ty.split('[').next().unwrap_or(ty);
    (!ty.is_empty()).then(|| ty.to_string())
}

fn strip_generics(name: &str) -> &str {
    name.split(['<', '[']).next().unwrap_or(name).trim()
}

/// `UserCard` and `App` are PascalCase, `API_URL` and `loadUser` are not.
pub fn is_pascal_case(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && name.chars().any(|c| c.is_ascii_lowercase())
        && !name.contains('_')
}
