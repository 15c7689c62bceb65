//! # reviewrag: codebase index and review context retrieval
//!
//! Indexes a source tree into typed chunks (files, functions, classes,
//! components), embeds them into a SQLite + sqlite-vec store alongside a
//! file dependency graph, and answers "what context does a reviewer need
//! for this changed file" queries.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration with defaults and validation
//! - **[`indexer`]**: tree-sitter chunking, import/export extraction, the indexing pipeline
//! - **[`fingerprint`]**: content-hash change detection
//! - **[`embedder`]**: hashing and ONNX (all-MiniLM-L6-v2) embedders
//! - **[`db`]**: vector index, fingerprint and edge tables
//! - **[`graph`]**: in-memory forward/reverse dependency graph
//! - **[`context`]**: similarity plus dependency context for a file
//! - **[`engine`]**: the store object exposing `index`, `get_context`, `get_stats`, `reset`
//! - **[`mcp`]**: MCP server (stdio transport via rmcp)

pub mod config;
pub mod context;
pub mod db;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod indexer;
pub mod mcp;
