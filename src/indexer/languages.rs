use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The closed set of languages the chunker understands.
///
/// Adding a language means adding a variant here together with its
/// grammar, definition query and node-kind tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::TypeScript,
        Language::Tsx,
        Language::JavaScript,
        Language::Go,
        Language::Rust,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Self::Python),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.name() == name)
    }

    /// TypeScript, TSX and JavaScript share import syntax and component rules.
    pub fn is_js_family(self) -> bool {
        matches!(self, Self::TypeScript | Self::Tsx | Self::JavaScript)
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    /// Definition query. Captures `@name` plus one of `@function`,
    /// `@method` or `@class` on the definition node.
    pub fn definition_query(self) -> &'static str {
        match self {
            Self::Python => PYTHON_QUERY,
            Self::TypeScript | Self::Tsx => TYPESCRIPT_QUERY,
            Self::JavaScript => JAVASCRIPT_QUERY,
            Self::Go => GO_QUERY,
            Self::Rust => RUST_QUERY,
        }
    }

    /// Node kinds whose body hides nested definitions from chunking.
    pub fn function_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["function_definition", "lambda"],
            Self::TypeScript | Self::Tsx | Self::JavaScript => &[
                "function_declaration",
                "generator_function_declaration",
                "function_expression",
                "arrow_function",
                "method_definition",
            ],
            Self::Go => &["function_declaration", "method_declaration", "func_literal"],
            Self::Rust => &["function_item", "closure_expression"],
        }
    }

    /// Node kinds that turn an enclosed function into a method.
    pub fn class_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["class_definition"],
            Self::TypeScript | Self::Tsx => &[
                "class_declaration",
                "abstract_class_declaration",
                "class",
            ],
            Self::JavaScript => &["class_declaration", "class"],
            Self::Go => &[],
            Self::Rust => &["impl_item", "trait_item"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PYTHON_QUERY: &str = r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class
"#;

const TYPESCRIPT_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(generator_function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])) @function

(variable_declaration
  (variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])) @function

(class_declaration
  name: (type_identifier) @name) @class

(abstract_class_declaration
  name: (type_identifier) @name) @class

(interface_declaration
  name: (type_identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method
"#;

const JAVASCRIPT_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(generator_function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])) @function

(variable_declaration
  (variable_declarator
    name: (identifier) @name
    value: [(arrow_function) (function_expression)])) @function

(class_declaration
  name: (identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method
"#;

const GO_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(method_declaration
  name: (field_identifier) @name) @method

(type_spec
  name: (type_identifier) @name
  type: (struct_type)) @class

(type_spec
  name: (type_identifier) @name
  type: (interface_type)) @class
"#;

const RUST_QUERY: &str = r#"
(function_item
  name: (identifier) @name) @function

(struct_item
  name: (type_identifier) @name) @class

(enum_item
  name: (type_identifier) @name) @class

(trait_item
  name: (type_identifier) @name) @class
"#;
