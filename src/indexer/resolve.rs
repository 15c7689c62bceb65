//! Maps import specifiers onto indexed files.
//!
//! Only files already known to the index are valid targets; anything that
//! does not resolve (standard library, third-party packages) yields no edge.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::imports::{ANY_SYMBOL, ImportRef};
use super::languages::Language;
use crate::graph::DependencyEdge;

const JS_EXTENSIONS: [&str; 6] = ["ts", "tsx", "js", "jsx", "mjs", "cjs"];

pub struct Resolver<'a> {
    /// Known file path -> exported names.
    files: BTreeMap<&'a str, HashSet<&'a str>>,
}

impl<'a> Resolver<'a> {
    pub fn new(files: impl IntoIterator<Item = (&'a str, &'a [String])>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, exports)| (path, exports.iter().map(String::as_str).collect()))
            .collect();
        Self { files }
    }

    pub fn is_known(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Resolve every import of `from`, dropping self-edges and duplicates.
    pub fn edges_for(
        &self,
        from: &str,
        lang: Language,
        imports: &[ImportRef],
    ) -> Vec<DependencyEdge> {
        let mut edges = BTreeSet::new();
        for import in imports {
            for target in self.resolve(from, lang, import) {
                if target != from {
                    edges.insert(DependencyEdge {
                        from_file: from.to_string(),
                        to_file: target,
                        symbol: import.symbol.clone(),
                    });
                }
            }
        }
        edges.into_iter().collect()
    }

    pub fn resolve(&self, from: &str, lang: Language, import: &ImportRef) -> Vec<String> {
        match lang {
            Language::Python => self.resolve_python(from, import).into_iter().collect(),
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                self.resolve_js(from, import).into_iter().collect()
            }
            Language::Go => self.resolve_go(&import.module),
            Language::Rust => self.resolve_rust(from, &import.module).into_iter().collect(),
        }
    }

    fn exports(&self, path: &str, symbol: &str) -> bool {
        self.files.get(path).is_some_and(|e| e.contains(symbol))
    }

    fn first_known(&self, candidates: impl IntoIterator<Item = String>) -> Option<String> {
        candidates.into_iter().find(|c| self.is_known(c))
    }

    // ── Python ───────────────────────────────────────────────────────

    fn resolve_python(&self, from: &str, import: &ImportRef) -> Option<String> {
        let module = import.module.as_str();
        let symbol = import.symbol.as_str();
        let submodule = symbol != ANY_SYMBOL && symbol != module;

        if module.starts_with('.') {
            let dots = module.len() - module.trim_start_matches('.').len();
            let rest = module[dots..].replace('.', "/");
            let mut base = parent_dir(from).to_string();
            for _ in 1..dots {
                base = parent_dir(&base).to_string();
            }
            let pkg = join(&base, &rest);

            let mut candidates = Vec::new();
            if submodule {
                candidates.push(join(&pkg, &format!("{symbol}.py")));
                candidates.push(join(&pkg, &format!("{symbol}/__init__.py")));
            }
            if !rest.is_empty() {
                candidates.push(format!("{pkg}.py"));
            }
            candidates.push(join(&pkg, "__init__.py"));
            return self.first_known(candidates);
        }

        let dotted = module.replace('.', "/");
        let mut suffixes = Vec::new();
        if submodule {
            suffixes.push(format!("{dotted}/{symbol}.py"));
            suffixes.push(format!("{dotted}/{symbol}/__init__.py"));
        }
        suffixes.push(format!("{dotted}.py"));
        suffixes.push(format!("{dotted}/__init__.py"));

        suffixes.iter().find_map(|suffix| {
            let matches: Vec<&str> = self
                .files
                .keys()
                .copied()
                .filter(|path| *path == suffix.as_str() || path.ends_with(&format!("/{suffix}")))
                .collect();
            self.pick_best(from, symbol, &matches)
        })
    }

    /// Prefer files exporting `symbol`, then the one sharing the longest
    /// directory prefix with the importer, then the lexicographically first.
    fn pick_best(&self, from: &str, symbol: &str, matches: &[&str]) -> Option<String> {
        let exporting: Vec<&str> = matches
            .iter()
            .copied()
            .filter(|m| self.exports(m, symbol))
            .collect();
        let pool = if exporting.is_empty() { matches } else { &exporting[..] };
        pool.iter()
            .copied()
            .max_by(|a, b| {
                shared_prefix_len(from, a)
                    .cmp(&shared_prefix_len(from, b))
                    .then_with(|| b.cmp(a))
            })
            .map(str::to_string)
    }

    // ── JavaScript / TypeScript ──────────────────────────────────────

    /// Probe extensions and `index` files in order; a candidate that
    /// exports the imported name wins over an earlier one that does not.
    fn resolve_js(&self, from: &str, import: &ImportRef) -> Option<String> {
        let module = import.module.as_str();
        let relative = module == "."
            || module == ".."
            || module.starts_with("./")
            || module.starts_with("../");
        if !relative {
            return None;
        }
        let base = normalize(&join(parent_dir(from), module));

        let mut candidates = vec![base.clone()];
        // TypeScript ESM imports name the emitted `.js` file.
        for js in [".js", ".jsx", ".mjs"] {
            if let Some(stem) = base.strip_suffix(js) {
                candidates.push(format!("{stem}.ts"));
                candidates.push(format!("{stem}.tsx"));
            }
        }
        candidates.extend(JS_EXTENSIONS.iter().map(|ext| format!("{base}.{ext}")));
        candidates.extend(
            JS_EXTENSIONS
                .iter()
                .map(|ext| join(&base, &format!("index.{ext}"))),
        );
        let known: Vec<String> = candidates
            .into_iter()
            .filter(|c| self.is_known(c))
            .collect();
        known
            .iter()
            .find(|c| self.exports(c, &import.symbol))
            .or_else(|| known.first())
            .cloned()
    }

    // ── Go ───────────────────────────────────────────────────────────

    /// An import path names a package directory; every non-test file in the
    /// longest matching known directory is a target.
    fn resolve_go(&self, module: &str) -> Vec<String> {
        let mut best: Option<&str> = None;
        for path in self.files.keys() {
            if !path.ends_with(".go") {
                continue;
            }
            let dir = parent_dir(path);
            if dir.is_empty() {
                continue;
            }
            let matches = module == dir || module.ends_with(&format!("/{dir}"));
            if matches && best.is_none_or(|b| dir.len() > b.len()) {
                best = Some(dir);
            }
        }
        let Some(dir) = best else {
            return Vec::new();
        };
        self.files
            .keys()
            .filter(|p| parent_dir(p) == dir && p.ends_with(".go") && !p.ends_with("_test.go"))
            .map(|p| p.to_string())
            .collect()
    }

    // ── Rust ─────────────────────────────────────────────────────────

    fn resolve_rust(&self, from: &str, module: &str) -> Option<String> {
        let module = module.strip_suffix("::*").unwrap_or(module);
        let segments: Vec<&str> = module.split("::").filter(|s| !s.is_empty()).collect();
        let (base, rest) = match segments.first().copied() {
            Some("crate") => (self.crate_root(from), &segments[1..]),
            Some("self") => (module_dir(from), &segments[1..]),
            Some("super") => {
                let supers = segments.iter().take_while(|s| **s == "super").count();
                let mut dir = module_dir(from);
                for _ in 0..supers {
                    dir = parent_dir(&dir).to_string();
                }
                (dir, &segments[supers..])
            }
            Some(_) => (module_dir(from), &segments[..]),
            None => return None,
        };

        // Longest module prefix that maps onto a file wins.
        (1..=rest.len()).rev().find_map(|n| {
            let path = join(&base, &rest[..n].join("/"));
            self.first_known([format!("{path}.rs"), join(&path, "mod.rs")])
        })
    }

    /// Nearest ancestor directory holding a known `lib.rs` or `main.rs`.
    fn crate_root(&self, from: &str) -> String {
        let mut dir = parent_dir(from);
        loop {
            if self.is_known(&join(dir, "lib.rs")) || self.is_known(&join(dir, "main.rs")) {
                return dir.to_string();
            }
            if dir.is_empty() {
                break;
            }
            dir = parent_dir(dir);
        }
        match from.find("src/") {
            Some(idx) => from[..idx + 3].to_string(),
            None => parent_dir(from).to_string(),
        }
    }
}

/// Directory holding the children of the module defined by `file`.
fn module_dir(file: &str) -> String {
    let name = file.rsplit('/').next().unwrap_or(file);
    if matches!(name, "lib.rs" | "main.rs" | "mod.rs") {
        parent_dir(file).to_string()
    } else {
        file.strip_suffix(".rs").unwrap_or(file).to_string()
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

fn join(dir: &str, rest: &str) -> String {
    match (dir.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => dir.to_string(),
        (false, false) => format!("{dir}/{rest}"),
    }
}

/// Collapse `.` and `..` segments.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(p) if *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn shared_prefix_len(a: &str, b: &str) -> usize {
    parent_dir(a)
        .split('/')
        .zip(parent_dir(b).split('/'))
        .take_while(|(x, y)| x == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(files: &[(&'static str, &[&str])]) -> (Vec<String>, Vec<Vec<String>>) {
        let paths = files.iter().map(|(p, _)| p.to_string()).collect();
        let exports = files
            .iter()
            .map(|(_, e)| e.iter().map(|s| s.to_string()).collect())
            .collect();
        (paths, exports)
    }

    fn build<'a>(paths: &'a [String], exports: &'a [Vec<String>]) -> Resolver<'a> {
        Resolver::new(
            paths
                .iter()
                .map(String::as_str)
                .zip(exports.iter().map(Vec::as_slice)),
        )
    }

    fn imp(symbol: &str, module: &str) -> ImportRef {
        ImportRef {
            symbol: symbol.to_string(),
            module: module.to_string(),
        }
    }

    #[test]
    fn test_python_root_level_import() {
        let (paths, exports) = resolver(&[("A.py", &["foo"]), ("B.py", &[])]);
        let r = build(&paths, &exports);
        let edges = r.edges_for("B.py", Language::Python, &[imp("foo", "A"), imp("os", "os")]);
        assert_eq!(
            edges,
            vec![DependencyEdge {
                from_file: "B.py".into(),
                to_file: "A.py".into(),
                symbol: "foo".into(),
            }]
        );
    }

    #[test]
    fn test_python_packages_and_relative() {
        let (paths, exports) = resolver(&[
            ("app/models/__init__.py", &[]),
            ("app/models/user.py", &["User"]),
            ("app/views.py", &[]),
            ("app/utils.py", &["slugify"]),
        ]);
        let r = build(&paths, &exports);
        let py = Language::Python;
        assert_eq!(
            r.resolve("app/views.py", py, &imp("user", "app.models")),
            vec!["app/models/user.py"]
        );
        assert_eq!(
            r.resolve("app/views.py", py, &imp("User", "app.models.user")),
            vec!["app/models/user.py"]
        );
        assert_eq!(
            r.resolve("app/views.py", py, &imp("slugify", ".utils")),
            vec!["app/utils.py"]
        );
        assert_eq!(
            r.resolve("app/models/user.py", py, &imp("slugify", "..utils")),
            vec!["app/utils.py"]
        );
        assert_eq!(
            r.resolve("app/views.py", py, &imp("models", "app.models")),
            vec!["app/models/__init__.py"]
        );
    }

    #[test]
    fn test_python_exports_break_ties() {
        let (paths, exports) = resolver(&[
            ("a/config.py", &["load"]),
            ("b/config.py", &["Settings"]),
            ("main.py", &[]),
        ]);
        let r = build(&paths, &exports);
        assert_eq!(
            r.resolve("main.py", Language::Python, &imp("Settings", "config")),
            vec!["b/config.py"]
        );
    }

    #[test]
    fn test_js_relative_probing() {
        let (paths, exports) = resolver(&[
            ("web/api/index.ts", &[]),
            ("web/util.js", &[]),
            ("web/hooks/useUser.tsx", &[]),
            ("web/app.tsx", &[]),
        ]);
        let r = build(&paths, &exports);
        let ts = Language::Tsx;
        assert_eq!(r.resolve("web/app.tsx", ts, &imp("*", "./api")), vec!["web/api/index.ts"]);
        assert_eq!(r.resolve("web/app.tsx", ts, &imp("x", "./util")), vec!["web/util.js"]);
        assert_eq!(
            r.resolve("web/api/index.ts", ts, &imp("useUser", "../hooks/useUser.js")),
            vec!["web/hooks/useUser.tsx"]
        );
        assert!(r.resolve("web/app.tsx", ts, &imp("React", "react")).is_empty());
    }

    #[test]
    fn test_js_reexport_breaks_ties() {
        use crate::indexer::imports::extract_exports;
        use tree_sitter::Parser;

        let barrel = "export { helper } from './helpers';\n";
        let mut parser = Parser::new();
        parser.set_language(&Language::TypeScript.grammar()).unwrap();
        let tree = parser.parse(barrel, None).unwrap();
        let barrel_exports =
            extract_exports(Language::TypeScript, tree.root_node(), barrel.as_bytes());
        assert_eq!(barrel_exports, vec!["helper"]);

        let paths = vec![
            "web/lib.ts".to_string(),
            "web/lib/index.ts".to_string(),
            "web/app.ts".to_string(),
        ];
        let exports = vec![vec!["format".to_string()], barrel_exports, Vec::new()];
        let r = build(&paths, &exports);
        let ts = Language::TypeScript;
        assert_eq!(r.resolve("web/app.ts", ts, &imp("helper", "./lib")), vec!["web/lib/index.ts"]);
        assert_eq!(r.resolve("web/app.ts", ts, &imp("format", "./lib")), vec!["web/lib.ts"]);
        assert_eq!(r.resolve("web/app.ts", ts, &imp("*", "./lib")), vec!["web/lib.ts"]);
    }

    #[test]
    fn test_go_package_directory() {
        let (paths, exports) = resolver(&[
            ("internal/store/store.go", &[]),
            ("internal/store/query.go", &[]),
            ("internal/store/store_test.go", &[]),
            ("cmd/main.go", &[]),
        ]);
        let r = build(&paths, &exports);
        assert_eq!(
            r.resolve(
                "cmd/main.go",
                Language::Go,
                &imp("store", "example.com/app/internal/store")
            ),
            vec!["internal/store/query.go", "internal/store/store.go"]
        );
        assert!(r.resolve("cmd/main.go", Language::Go, &imp("fmt", "fmt")).is_empty());
    }

    #[test]
    fn test_rust_module_paths() {
        let (paths, exports) = resolver(&[
            ("src/lib.rs", &[]),
            ("src/config.rs", &[]),
            ("src/db/mod.rs", &[]),
            ("src/db/models.rs", &[]),
            ("src/db/search.rs", &[]),
        ]);
        let r = build(&paths, &exports);
        let rs = Language::Rust;
        assert_eq!(
            r.resolve("src/lib.rs", rs, &imp("config", "self::config")),
            vec!["src/config.rs"]
        );
        assert_eq!(
            r.resolve("src/db/search.rs", rs, &imp("Chunk", "crate::db::models::Chunk")),
            vec!["src/db/models.rs"]
        );
        assert_eq!(
            r.resolve("src/db/search.rs", rs, &imp("Chunk", "super::models::Chunk")),
            vec!["src/db/models.rs"]
        );
        assert_eq!(
            r.resolve("src/db/mod.rs", rs, &imp("search", "self::search")),
            vec!["src/db/search.rs"]
        );
        assert!(r.resolve("src/lib.rs", rs, &imp("HashMap", "std::collections::HashMap")).is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("web/./api/../util"), "web/util");
        assert_eq!(normalize("../x"), "../x");
    }
}
