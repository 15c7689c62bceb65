/// Deterministic feature-hashing embedder.
///
/// Tokenizes text into identifier-like terms, splits camelCase and
/// snake_case into sub-terms, and hashes each term into a signed bucket
/// with blake3. Texts sharing vocabulary land close together, which makes
/// the engine usable without any model files and keeps tests reproducible
/// across processes and platforms.
use std::sync::LazyLock;

use regex::Regex;

use super::{Embedder, EmbedderError};

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+").expect("valid term regex"));

/// Sub-terms weigh less than the full identifier.
const SUBTERM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder producing L2-normalized vectors.
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl HashingEmbedder {
    /// Create a new `HashingEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn add_term(&self, vector: &mut [f32], term: &str, weight: f32) {
        let hash = blake3::hash(term.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(idx_bytes) % self.dimensions as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut embedding = vec![0.0f32; self.dimensions];

        // Anchor term so empty input still yields a unit vector.
        self.add_term(&mut embedding, "\u{0}", 0.1);

        for m in TERM_RE.find_iter(text) {
            let term = m.as_str();
            self.add_term(&mut embedding, &term.to_lowercase(), 1.0);
            let parts = split_identifier(term);
            if parts.len() > 1 {
                for part in parts {
                    self.add_term(&mut embedding, &part, SUBTERM_WEIGHT);
                }
            }
        }

        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Split `parseHttpRequest` / `parse_http_request` into lowercase parts.
fn split_identifier(term: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in term.split('_').filter(|p| !p.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in piece.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}
