use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use super::languages::Language;

/// One imported name and the module specifier it comes from, exactly as
/// written in the source (`"./api"`, `"..models"`, `"crate::db"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportRef {
    pub symbol: String,
    pub module: String,
}

impl ImportRef {
    fn new(symbol: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            module: module.into(),
        }
    }
}

/// Wildcard symbol for namespace, glob and side-effect imports.
pub const ANY_SYMBOL: &str = "*";

pub fn extract_imports(lang: Language, root: Node<'_>, source: &[u8]) -> Vec<ImportRef> {
    let mut out = Vec::new();
    visit(root, |node| match lang {
        Language::Python => python_import(node, source, &mut out),
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            js_import(node, source, &mut out)
        }
        Language::Go => go_import(node, source, &mut out),
        Language::Rust => rust_import(node, source, &mut out),
    });
    out.dedup();
    out
}

pub fn extract_exports(lang: Language, root: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        match lang {
            Language::Python => python_export(node, source, &mut out),
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                js_export(node, source, &mut out)
            }
            Language::Go => go_export(node, source, &mut out),
            Language::Rust => rust_export(node, source, &mut out),
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Pre-order traversal of every node below `root`.
fn visit<'t>(root: Node<'t>, mut f: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        f(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

fn text<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or_default()
}

fn field_text<'s>(node: Node<'_>, field: &str, source: &'s [u8]) -> Option<&'s str> {
    node.child_by_field_name(field).map(|n| text(n, source))
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

// ── Python ───────────────────────────────────────────────────────────

fn python_import(node: Node<'_>, source: &[u8], out: &mut Vec<ImportRef>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let module = aliased_name(name, source);
                out.push(ImportRef::new(module, module));
            }
        }
        "import_from_statement" => {
            let Some(module) = field_text(node, "module_name", source) else {
                return;
            };
            let mut cursor = node.walk();
            let names: Vec<&str> = node
                .children_by_field_name("name", &mut cursor)
                .map(|n| aliased_name(n, source))
                .collect();
            if names.is_empty() {
                out.push(ImportRef::new(ANY_SYMBOL, module));
            }
            for name in names {
                out.push(ImportRef::new(name, module));
            }
        }
        _ => {}
    }
}

/// `a.b as c` imports `a.b`.
fn aliased_name<'s>(node: Node<'_>, source: &'s [u8]) -> &'s str {
    if node.kind() == "aliased_import" {
        field_text(node, "name", source).unwrap_or_default()
    } else {
        text(node, source)
    }
}

fn python_export(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    let def = if node.kind() == "decorated_definition" {
        match node.child_by_field_name("definition") {
            Some(d) => d,
            None => return,
        }
    } else {
        node
    };
    let name = match def.kind() {
        "function_definition" | "class_definition" => field_text(def, "name", source),
        "expression_statement" => def
            .named_child(0)
            .filter(|n| n.kind() == "assignment")
            .and_then(|a| a.child_by_field_name("left"))
            .filter(|l| l.kind() == "identifier")
            .map(|l| text(l, source)),
        _ => None,
    };
    if let Some(name) = name.filter(|n| !n.is_empty() && !n.starts_with('_')) {
        out.push(name.to_string());
    }
}

// ── JavaScript / TypeScript ──────────────────────────────────────────

fn js_import(node: Node<'_>, source: &[u8], out: &mut Vec<ImportRef>) {
    match node.kind() {
        "import_statement" => {
            let Some(module) = field_text(node, "source", source).map(unquote) else {
                return;
            };
            let before = out.len();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "import_clause" {
                    import_clause(child, module, source, out);
                }
            }
            if out.len() == before {
                out.push(ImportRef::new(ANY_SYMBOL, module));
            }
        }
        "export_statement" => {
            // Only re-exports (`export { a } from './x'`) import anything.
            let Some(module) = field_text(node, "source", source).map(unquote) else {
                return;
            };
            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "export_clause" {
                    specifier_names(child, "export_specifier", source, &mut names);
                }
            }
            if names.is_empty() {
                out.push(ImportRef::new(ANY_SYMBOL, module));
            }
            for name in names {
                out.push(ImportRef::new(name, module));
            }
        }
        "call_expression" => {
            let is_require = node
                .child_by_field_name("function")
                .is_some_and(|f| f.kind() == "identifier" && text(f, source) == "require");
            if !is_require {
                return;
            }
            let Some(arg) = node
                .child_by_field_name("arguments")
                .and_then(|a| a.named_child(0))
                .filter(|a| a.kind() == "string")
            else {
                return;
            };
            let symbol = node
                .parent()
                .filter(|p| p.kind() == "variable_declarator")
                .and_then(|p| p.child_by_field_name("name"))
                .filter(|n| n.kind() == "identifier")
                .map_or(ANY_SYMBOL, |n| text(n, source));
            out.push(ImportRef::new(symbol, unquote(text(arg, source))));
        }
        _ => {}
    }
}

fn import_clause(clause: Node<'_>, module: &str, source: &[u8], out: &mut Vec<ImportRef>) {
    let mut cursor = clause.walk();
    for child in clause.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => out.push(ImportRef::new(text(child, source), module)),
            "namespace_import" => out.push(ImportRef::new(ANY_SYMBOL, module)),
            "named_imports" => {
                let mut names = Vec::new();
                specifier_names(child, "import_specifier", source, &mut names);
                for name in names {
                    out.push(ImportRef::new(name, module));
                }
            }
            _ => {}
        }
    }
}

/// Original (pre-alias) names of `import_specifier` / `export_specifier`.
fn specifier_names<'s>(list: Node<'_>, kind: &str, source: &'s [u8], out: &mut Vec<&'s str>) {
    let mut cursor = list.walk();
    for spec in list.named_children(&mut cursor) {
        if spec.kind() == kind {
            if let Some(name) = field_text(spec, "name", source) {
                out.push(unquote(name));
            }
        }
    }
}

fn js_export(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    if node.kind() != "export_statement" {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "default" => out.push("default".to_string()),
            "export_clause" => {
                let mut inner = child.walk();
                for spec in child.named_children(&mut inner) {
                    if spec.kind() != "export_specifier" {
                        continue;
                    }
                    let exported = field_text(spec, "alias", source)
                        .or_else(|| field_text(spec, "name", source));
                    if let Some(name) = exported {
                        out.push(unquote(name).to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let Some(decl) = node.child_by_field_name("declaration") else {
        return;
    };
    match decl.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut inner = decl.walk();
            for declarator in decl.named_children(&mut inner) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                if let Some(name) = declarator
                    .child_by_field_name("name")
                    .filter(|n| n.kind() == "identifier")
                {
                    out.push(text(name, source).to_string());
                }
            }
        }
        _ => {
            if let Some(name) = field_text(decl, "name", source) {
                out.push(name.to_string());
            }
        }
    }
}

// ── Go ───────────────────────────────────────────────────────────────

fn go_import(node: Node<'_>, source: &[u8], out: &mut Vec<ImportRef>) {
    if node.kind() != "import_spec" {
        return;
    }
    let Some(path) = field_text(node, "path", source).map(unquote) else {
        return;
    };
    let alias = field_text(node, "name", source).filter(|a| *a != "_" && *a != ".");
    let symbol = alias.unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path));
    out.push(ImportRef::new(symbol, path));
}

fn go_export(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    let mut names = Vec::new();
    match node.kind() {
        "function_declaration" => names.extend(field_text(node, "name", source)),
        "type_declaration" | "const_declaration" | "var_declaration" => {
            let mut cursor = node.walk();
            for spec in node.named_children(&mut cursor) {
                let mut inner = spec.walk();
                names.extend(
                    spec.children_by_field_name("name", &mut inner)
                        .map(|n| text(n, source)),
                );
            }
        }
        _ => {}
    }
    for name in names {
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            out.push(name.to_string());
        }
    }
}

// ── Rust ─────────────────────────────────────────────────────────────

fn rust_import(node: Node<'_>, source: &[u8], out: &mut Vec<ImportRef>) {
    match node.kind() {
        "use_declaration" => {
            let Some(argument) = field_text(node, "argument", source) else {
                return;
            };
            for path in expand_use_tree(argument) {
                let (module, symbol) = match path.rsplit_once("::") {
                    Some((head, "self")) => {
                        let last = head.rsplit("::").next().unwrap_or(head);
                        (head.to_string(), last.to_string())
                    }
                    Some((_, last)) => (path.clone(), last.to_string()),
                    None => (path.clone(), path.clone()),
                };
                out.push(ImportRef::new(symbol, module));
            }
        }
        // `mod name;` pulls in a sibling file.
        "mod_item" if node.child_by_field_name("body").is_none() => {
            if let Some(name) = field_text(node, "name", source) {
                out.push(ImportRef::new(name, format!("self::{name}")));
            }
        }
        _ => {}
    }
}

/// Flatten `crate::a::{b, c::{d as e, self}}` into full paths.
pub fn expand_use_tree(tree: &str) -> Vec<String> {
    let flat: String = tree.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = Vec::new();
    expand_into("", &flat, &mut out);
    out
}

fn expand_into(prefix: &str, tree: &str, out: &mut Vec<String>) {
    let tree = tree.trim();
    if tree.is_empty() {
        return;
    }
    if let (Some(open), true) = (tree.find('{'), tree.ends_with('}')) {
        let head = &tree[..open];
        let inner = &tree[open + 1..tree.len() - 1];
        let prefix = format!("{prefix}{head}");
        for item in split_top_level(inner) {
            expand_into(&prefix, item, out);
        }
        return;
    }
    let leaf = tree.split(" as ").next().unwrap_or(tree).trim();
    out.push(format!("{prefix}{leaf}"));
}

fn split_top_level(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&list[start..]);
    items
}

fn rust_export(node: Node<'_>, source: &[u8], out: &mut Vec<String>) {
    let is_item = matches!(
        node.kind(),
        "function_item"
            | "struct_item"
            | "enum_item"
            | "trait_item"
            | "type_item"
            | "const_item"
            | "static_item"
            | "mod_item"
            | "union_item"
    );
    if !is_item {
        return;
    }
    let mut cursor = node.walk();
    let is_pub = node
        .children(&mut cursor)
        .any(|c| c.kind() == "visibility_modifier");
    if is_pub {
        if let Some(name) = field_text(node, "name", source) {
            out.push(name.to_string());
        }
    }
}
