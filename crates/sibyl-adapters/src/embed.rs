use async_trait::async_trait;
use sha2::{Digest, Sha256};

use sibyl_core::vectors;

use crate::error::AdapterError;

/// Batch text → unit-normalized dense vectors. Dimensionality is fixed per
/// deployment.
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError>;
}

/// Deterministic local embedder: hashed bag-of-tokens with signed buckets.
///
/// No model download, no network, stable across runs — the default when no
/// external embedding endpoint is configured, and the embedder every test
/// uses. Semantically similar texts share tokens and therefore buckets.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap()) as usize
                % self.dimension;
            // Second hash byte decides the sign, spreading collisions.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        vectors::normalize(&mut v);
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingAdapter for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed(&["rust memory safety".to_string()]).await.unwrap();
        let b = e.embed(&["rust memory safety".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let e = HashEmbedder::new(128);
        let vs = e
            .embed(&[
                "rust borrow checker ownership".to_string(),
                "rust ownership and borrowing".to_string(),
                "chocolate cake recipe".to_string(),
            ])
            .await
            .unwrap();
        let close = vectors::cosine_similarity(&vs[0], &vs[1]);
        let far = vectors::cosine_similarity(&vs[0], &vs[2]);
        assert!(close > far);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let e = HashEmbedder::new(64);
        let vs = e.embed(&["hello world".to_string()]).await.unwrap();
        let norm: f32 = vs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
