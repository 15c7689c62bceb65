//! In-memory file dependency graph.
//!
//! Forward adjacency is authoritative; the reverse index is maintained
//! alongside it on every mutation so `reverse` never scans.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Directed relation `from_file` imports `symbol` from `to_file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_file: String,
    pub to_file: String,
    pub symbol: String,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// from -> {(to, symbol)}
    outgoing: BTreeMap<String, BTreeSet<(String, String)>>,
    /// to -> {from}
    incoming: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: impl IntoIterator<Item = DependencyEdge>) -> Self {
        let mut by_file: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for e in edges {
            by_file
                .entry(e.from_file)
                .or_default()
                .push((e.to_file, e.symbol));
        }
        let mut graph = Self::new();
        for (file, targets) in by_file {
            graph.add_edges(&file, targets);
        }
        graph
    }

    /// Replace every outgoing edge of `file` with `edges` (`(to, symbol)`).
    pub fn add_edges(&mut self, file: &str, edges: impl IntoIterator<Item = (String, String)>) {
        self.drop_outgoing(file);
        let set: BTreeSet<(String, String)> = edges.into_iter().filter(|(to, _)| to != file).collect();
        if set.is_empty() {
            return;
        }
        for (to, _) in &set {
            self.incoming
                .entry(to.clone())
                .or_default()
                .insert(file.to_string());
        }
        self.outgoing.insert(file.to_string(), set);
    }

    /// Files `file` imports directly.
    pub fn forward(&self, file: &str) -> BTreeSet<String> {
        self.outgoing
            .get(file)
            .map(|set| set.iter().map(|(to, _)| to.clone()).collect())
            .unwrap_or_default()
    }

    /// Outgoing `(to, symbol)` pairs of `file`.
    pub fn outgoing(&self, file: &str) -> BTreeSet<(String, String)> {
        self.outgoing.get(file).cloned().unwrap_or_default()
    }

    /// Files that import `file` directly.
    pub fn reverse(&self, file: &str) -> BTreeSet<String> {
        self.incoming.get(file).cloned().unwrap_or_default()
    }

    /// Drop `file` with its outgoing edges and every edge pointing at it.
    pub fn remove_file(&mut self, file: &str) {
        self.drop_outgoing(file);
        if let Some(importers) = self.incoming.remove(file) {
            for from in importers {
                if let Some(set) = self.outgoing.get_mut(&from) {
                    set.retain(|(to, _)| to != file);
                    if set.is_empty() {
                        self.outgoing.remove(&from);
                    }
                }
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeSet::len).sum()
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.outgoing
            .iter()
            .flat_map(|(from, set)| {
                set.iter().map(move |(to, symbol)| DependencyEdge {
                    from_file: from.clone(),
                    to_file: to.clone(),
                    symbol: symbol.clone(),
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }

    fn drop_outgoing(&mut self, file: &str) {
        let Some(old) = self.outgoing.remove(file) else {
            return;
        };
        for (to, _) in old {
            if let Some(importers) = self.incoming.get_mut(&to) {
                importers.remove(file);
                if importers.is_empty() {
                    self.incoming.remove(&to);
                }
            }
        }
    }
}
