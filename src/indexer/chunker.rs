use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Query};

use super::imports::{self, ImportRef};
use super::languages::Language;
use super::symbols;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Function,
    Class,
    Component,
}

impl ChunkKind {
    pub const SYMBOLS: [ChunkKind; 3] = [ChunkKind::Function, ChunkKind::Class, ChunkKind::Component];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::Component => "component",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "component" => Some(Self::Component),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, line-ranged slice of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub kind: ChunkKind,
    pub filepath: String,
    /// Qualified symbol name (`Class.method` for methods), empty for file chunks.
    pub name: String,
    pub parent: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub content_hash: String,
    pub language: Language,
    pub truncated: bool,
}

impl Chunk {
    /// Text handed to the embedder, enriched with language and symbol context.
    pub fn embedding_text(&self) -> String {
        match self.kind {
            ChunkKind::File => format!("{} file {}\n{}", self.language, self.filepath, self.text),
            kind => format!("{} {} {}\n{}", self.language, kind, self.name, self.text),
        }
    }
}

/// Everything extracted from one source file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub language: Language,
    pub chunks: Vec<Chunk>,
    pub imports: Vec<ImportRef>,
    pub exports: Vec<String>,
    /// Set when the syntax tree contained errors and only the file chunk
    /// was emitted.
    pub parse_error: Option<String>,
}

/// Deterministic chunk id: `kind:filepath:name`, or `file:filepath`.
pub fn chunk_id(kind: ChunkKind, filepath: &str, name: &str) -> String {
    if name.is_empty() {
        format!("{kind}:{filepath}")
    } else {
        format!("{kind}:{filepath}:{name}")
    }
}

/// blake3 hex digest used for chunk and file fingerprints.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Cap `text` at `max_chars` characters, returning whether it was cut.
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Splits source files into file, function, class and component chunks.
///
/// Holds one compiled definition query per language; parsers are created
/// per call so a single `Chunker` can be shared across worker threads.
pub struct Chunker {
    queries: HashMap<Language, Query>,
    max_chars: usize,
}

impl Chunker {
    pub fn new(max_chars: usize) -> Result<Self> {
        let mut queries = HashMap::new();
        for lang in Language::ALL {
            let query = Query::new(&lang.grammar(), lang.definition_query())?;
            queries.insert(lang, query);
        }
        Ok(Self {
            queries,
            max_chars: max_chars.max(1),
        })
    }

    pub fn chunk(&self, filepath: &str, text: &str) -> Result<ParsedFile> {
        let language = Language::from_path(filepath)
            .ok_or_else(|| IndexError::UnsupportedLanguage(filepath.to_string()))?;

        let mut builder = ChunkBuilder::new(filepath, language, self.max_chars);
        let line_count = text.lines().count().max(1);
        builder.push(ChunkKind::File, String::new(), None, 1, line_count, text);

        let mut parser = Parser::new();
        parser.set_language(&language.grammar())?;

        let Some(tree) = parser.parse(text, None) else {
            return Ok(ParsedFile {
                language,
                chunks: builder.finish(),
                imports: Vec::new(),
                exports: Vec::new(),
                parse_error: Some("parser produced no tree".to_string()),
            });
        };

        let root = tree.root_node();
        let source = text.as_bytes();
        let imports = imports::extract_imports(language, root, source);
        let exports = imports::extract_exports(language, root, source);

        // Error-tolerant trees still yield imports, but symbol boundaries
        // inside them are unreliable.
        if root.has_error() {
            let position = first_error_line(root).unwrap_or(1);
            return Ok(ParsedFile {
                language,
                chunks: builder.finish(),
                imports,
                exports,
                parse_error: Some(format!("syntax error near line {position}")),
            });
        }

        let query = self
            .queries
            .get(&language)
            .ok_or_else(|| IndexError::UnsupportedLanguage(filepath.to_string()))?;

        for def in symbols::extract_definitions(language, query, root, source) {
            let slice = &text[def.start_byte..def.end_byte];
            builder.push(def.kind, def.name, def.parent, def.start_line, def.end_line, slice);
        }

        Ok(ParsedFile {
            language,
            chunks: builder.finish(),
            imports,
            exports,
            parse_error: None,
        })
    }
}

fn first_error_line(root: tree_sitter::Node<'_>) -> Option<usize> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// Accumulates chunks, assigning ids and de-duplicating collisions with a
/// `#n` suffix in order of appearance.
struct ChunkBuilder<'a> {
    filepath: &'a str,
    language: Language,
    max_chars: usize,
    seen: HashMap<String, usize>,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(filepath: &'a str, language: Language, max_chars: usize) -> Self {
        Self {
            filepath,
            language,
            max_chars,
            seen: HashMap::new(),
            chunks: Vec::new(),
        }
    }

    fn push(
        &mut self,
        kind: ChunkKind,
        name: String,
        parent: Option<String>,
        start_line: usize,
        end_line: usize,
        text: &str,
    ) {
        let base = chunk_id(kind, self.filepath, &name);
        let count = self.seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let id = if *count == 1 {
            base
        } else {
            format!("{base}#{count}")
        };

        let (text, truncated) = truncate_chars(text, self.max_chars);
        self.chunks.push(Chunk {
            id,
            kind,
            filepath: self.filepath.to_string(),
            name,
            parent,
            start_line,
            end_line,
            content_hash: content_hash(text.as_bytes()),
            text: text.to_string(),
            language: self.language,
            truncated,
        });
    }

    fn finish(self) -> Vec<Chunk> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(32_000).expect("chunker")
    }

    fn names(parsed: &ParsedFile) -> Vec<(ChunkKind, &str)> {
        parsed
            .chunks
            .iter()
            .map(|c| (c.kind, c.name.as_str()))
            .collect()
    }

    #[test]
    fn test_python_file_function_and_methods() {
        let source = r#"import os

class Cart:
    def total(self):
        def helper():
            return 0
        return helper()

def foo():
    return 1
"#;
        let parsed = chunker().chunk("shop/cart.py", source).unwrap();
        assert!(parsed.parse_error.is_none());
        assert_eq!(
            names(&parsed),
            vec![
                (ChunkKind::File, ""),
                (ChunkKind::Class, "Cart"),
                (ChunkKind::Function, "Cart.total"),
                (ChunkKind::Function, "foo"),
            ],
            "nested helper must not be chunked"
        );

        let file = &parsed.chunks[0];
        assert_eq!(file.id, "file:shop/cart.py");
        assert_eq!(file.start_line, 1);
        assert_eq!(file.end_line, 10);

        let method = &parsed.chunks[2];
        assert_eq!(method.id, "function:shop/cart.py:Cart.total");
        assert_eq!(method.parent.as_deref(), Some("Cart"));
        assert_eq!(method.start_line, 4);
    }

    #[test]
    fn test_ids_and_hashes_are_stable() {
        let source = "def foo():\n    return 1\n";
        let a = chunker().chunk("a.py", source).unwrap();
        let b = chunker().chunk("a.py", source).unwrap();
        assert_eq!(a.chunks, b.chunks);
    }

    #[test]
    fn test_docstring_edit_keeps_function_hash() {
        let before = "\"\"\"Module docs.\"\"\"\n\ndef foo():\n    return 1\n";
        let after = "\"\"\"Module docs, reworded.\"\"\"\n\ndef foo():\n    return 1\n";
        let a = chunker().chunk("A.py", before).unwrap();
        let b = chunker().chunk("A.py", after).unwrap();
        assert_ne!(a.chunks[0].content_hash, b.chunks[0].content_hash);
        assert_eq!(a.chunks[1].id, b.chunks[1].id);
        assert_eq!(a.chunks[1].content_hash, b.chunks[1].content_hash);
    }

    #[test]
    fn test_tsx_components_and_methods() {
        let source = r#"import React from 'react';

export const UserCard = ({ user }) => {
  return <div>{user.name}</div>;
};

export function formatName(user: User): string {
  return user.name;
}

interface User {
  name: string;
}

class Store {
  load() {
    return 1;
  }
}
"#;
        let parsed = chunker().chunk("web/UserCard.tsx", source).unwrap();
        assert!(parsed.parse_error.is_none(), "{:?}", parsed.parse_error);
        let got = names(&parsed);
        assert!(got.contains(&(ChunkKind::Component, "UserCard")));
        assert!(got.contains(&(ChunkKind::Function, "formatName")));
        assert!(got.contains(&(ChunkKind::Class, "User")));
        assert!(got.contains(&(ChunkKind::Class, "Store")));
        assert!(got.contains(&(ChunkKind::Function, "Store.load")));
    }

    #[test]
    fn test_go_methods_use_receiver_type() {
        let source = r#"package server

type Server struct {
	addr string
}

func (s *Server) Start() error {
	return nil
}

func New(addr string) *Server {
	return &Server{addr: addr}
}
"#;
        let parsed = chunker().chunk("server/server.go", source).unwrap();
        let got = names(&parsed);
        assert!(got.contains(&(ChunkKind::Class, "Server")));
        assert!(got.contains(&(ChunkKind::Function, "Server.Start")));
        assert!(got.contains(&(ChunkKind::Function, "New")));
    }

    #[test]
    fn test_rust_impl_methods() {
        let source = r#"pub struct Db;

impl Db {
    pub fn open() -> Self {
        fn inner() {}
        Db
    }
}

pub fn helper() {}
"#;
        let parsed = chunker().chunk("src/db.rs", source).unwrap();
        assert_eq!(
            names(&parsed),
            vec![
                (ChunkKind::File, ""),
                (ChunkKind::Class, "Db"),
                (ChunkKind::Function, "Db.open"),
                (ChunkKind::Function, "helper"),
            ]
        );
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let source = "def foo():\n    return 1\n\ndef foo():\n    return 2\n";
        let parsed = chunker().chunk("dup.py", source).unwrap();
        assert_eq!(parsed.chunks[1].id, "function:dup.py:foo");
        assert_eq!(parsed.chunks[2].id, "function:dup.py:foo#2");
    }

    #[test]
    fn test_syntax_error_falls_back_to_file_chunk() {
        let source = "import os\n\ndef broken(:\n    return\n";
        let parsed = chunker().chunk("bad.py", source).unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].kind, ChunkKind::File);
        assert!(parsed.parse_error.is_some());
        assert_eq!(parsed.imports.len(), 1, "imports survive the error");
    }

    #[test]
    fn test_oversized_file_is_truncated() {
        let chunker = Chunker::new(10).unwrap();
        let parsed = chunker.chunk("big.py", "x = 'ééééééééééééééé'\n").unwrap();
        let file = &parsed.chunks[0];
        assert!(file.truncated);
        assert_eq!(file.text.chars().count(), 10);
    }

    #[test]
    fn test_unsupported_language() {
        let err = chunker().chunk("README.md", "# hi").unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedLanguage(_)));
        assert!(err.is_soft());
    }
}
