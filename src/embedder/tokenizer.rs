//! `tokenizer.json` loading for the ONNX embedder.
//!
//! Encodings are truncated to the model window and left unpadded; the
//! embedder right-pads each batch itself.
use std::path::Path;

use tokenizers::{Encoding, Tokenizer, TruncationParams};

use super::EmbedderError;

/// all-MiniLM-L6-v2 was trained with 256-token windows.
pub const MAX_SEQ_LEN: usize = 256;

/// Token ids and attention mask of one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedText {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl From<&Encoding> for EncodedText {
    fn from(encoding: &Encoding) -> Self {
        let widen = |xs: &[u32]| xs.iter().map(|&x| i64::from(x)).collect();
        Self {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
        }
    }
}

pub struct ModelTokenizer {
    inner: Tokenizer,
}

impl ModelTokenizer {
    pub fn load(path: &Path) -> Result<Self, EmbedderError> {
        if !path.is_file() {
            return Err(EmbedderError::ModelUnavailable(format!(
                "{} not found",
                path.display()
            )));
        }
        let mut inner = Tokenizer::from_file(path)
            .map_err(|e| EmbedderError::TokenizerError(format!("load {}: {e}", path.display())))?;
        inner
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| EmbedderError::TokenizerError(format!("truncation: {e}")))?;
        inner.with_padding(None);
        Ok(Self { inner })
    }

    pub fn encode(&self, texts: &[&str]) -> Result<Vec<EncodedText>, EmbedderError> {
        let encodings = self
            .inner
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbedderError::TokenizerError(format!("encode: {e}")))?;
        Ok(encodings.iter().map(EncodedText::from).collect())
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}
