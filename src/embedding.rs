//! Hashing-trick text embeddings and the vector blob codec.
//!
//! Tokens are hashed into a fixed number of buckets and accumulated by
//! frequency, then L2-normalized. Bucket collisions are accepted by design;
//! this trades accuracy for an unbounded vocabulary in a fixed-size vector.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tokenize::Tokenizer;

/// Converts text into fixed-width normalized embeddings.
///
/// `embed` is a pure function of its input: identical text yields a
/// bit-identical vector across calls and process restarts. The token hash
/// is CRC32 rather than the stdlib hasher because persisted vectors must
/// keep agreeing with freshly computed ones.
pub struct Embedder {
    dimensions: usize,
    tokenizer: Arc<Tokenizer>,
}

impl Embedder {
    pub fn new(dimensions: usize, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            dimensions,
            tokenizer,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text` into a unit-norm vector, or the zero vector when the
    /// input produced no scorable tokens.
    ///
    /// Field weighting is the caller's responsibility: repeat a field's text
    /// before concatenation to raise its contribution.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let tokens = self.tokenizer.tokenize(&lowered);

        // BTreeMap keeps accumulation order deterministic.
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }

        for (token, count) in &counts {
            let bucket = crc32fast::hash(token.as_bytes()) as usize % self.dimensions;
            vector[bucket] += *count as f32;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob length mismatch: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

/// Encode an embedding as little-endian f32 bytes, the format shared by the
/// record store's cached blobs and the persistence file entries.
pub fn encode_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob, validating its length against the
/// expected width.
pub fn decode_blob(blob: &[u8], dimensions: usize) -> Result<Vec<f32>, BlobError> {
    if blob.len() != dimensions * 4 {
        return Err(BlobError::Length {
            expected: dimensions * 4,
            got: blob.len(),
        });
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder(dimensions: usize) -> Embedder {
        Embedder::new(dimensions, Arc::new(Tokenizer::new(100)))
    }

    #[test]
    fn test_embed_is_deterministic() {
        let emb = embedder(128);
        let a = emb.embed("the quick brown fox jumps over the lazy dog");
        let b = emb.embed("the quick brown fox jumps over the lazy dog");
        assert_eq!(a, b);
    }

    #[test]
    fn test_embed_is_unit_normalized() {
        let emb = embedder(128);
        let v = emb.embed("machine learning with rust");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn test_embed_empty_text_is_zero_vector() {
        let emb = embedder(128);
        let v = emb.embed("");
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_embed_no_scorable_tokens_is_zero_vector() {
        let emb = embedder(128);
        // Only single-char and punctuation tokens, all filtered out.
        let v = emb.embed("a b c . , !");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_embed_is_case_insensitive() {
        let emb = embedder(128);
        assert_eq!(emb.embed("Rust Programming"), emb.embed("rust programming"));
    }

    #[test]
    fn test_embed_is_order_insensitive() {
        // Bag-of-words: token order must not matter.
        let emb = embedder(128);
        assert_eq!(emb.embed("cat dog"), emb.embed("dog cat"));
    }

    #[test]
    fn test_repetition_shifts_weight() {
        let emb = embedder(128);
        let single = emb.embed("apple banana");
        let weighted = emb.embed("apple apple apple banana");
        assert_ne!(single, weighted);
    }

    #[test]
    fn test_blob_round_trip() {
        let emb = embedder(128);
        let v = emb.embed("round trip me");
        let blob = encode_blob(&v);
        assert_eq!(blob.len(), 128 * 4);
        let decoded = decode_blob(&blob, 128).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn test_decode_blob_rejects_wrong_length() {
        let result = decode_blob(&[0u8; 12], 128);
        assert!(matches!(
            result,
            Err(BlobError::Length {
                expected: 512,
                got: 12
            })
        ));
    }
}
