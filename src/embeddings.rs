//! Embedding Encoder (C1): deterministic text -> fixed-length vector.
//!
//! Pluggable behind the [`EmbeddingEncoder`] trait so the Discovery Service
//! never depends on a concrete model (§9 design note: "Embedding model is a
//! pluggable capability"). The default encoder is a local sentence-encoding
//! model loaded via `model2vec-rs`/`hf-hub`; test builds may substitute
//! [`HashEncoder`], a deterministic hash-based pseudo-embedding, to avoid
//! pulling a real model into unit tests.

use std::hash::Hasher;

/// Default embedding dimension (§2 C1: "384-dim default, configurable").
pub const DEFAULT_DIMENSION: usize = 384;

/// A pluggable text encoder producing fixed-length, L2-normalized vectors
/// (so that dot product equals cosine similarity).
pub trait EmbeddingEncoder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode(&self, text: &str) -> Vec<f32>;

    /// Batch variant; the default forwards to `encode` one at a time. The
    /// model2vec-backed encoder overrides this for real batching.
    fn encode_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

/// L2-normalize a vector in place.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of two vectors (equals cosine similarity when both are
/// L2-normalized, as every [`EmbeddingEncoder`] output is required to be).
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Local sentence-encoding model loaded from a HuggingFace Hub model id or a
/// local path (e.g. `minishlab/potion-base-8M`). The model's native output
/// dimension is used as-is; callers should not assume `DEFAULT_DIMENSION`
/// without checking `dimension()`.
#[cfg(feature = "semantic")]
pub struct Model2VecEncoder {
    model: model2vec_rs::model::StaticModel,
    dimension: usize,
}

#[cfg(feature = "semantic")]
impl Model2VecEncoder {
    pub fn load(model_path: &str) -> anyhow::Result<Self> {
        tracing::info!(model = model_path, "loading embedding model");
        let model = model2vec_rs::model::StaticModel::from_pretrained(model_path, None, Some(true), None)
            .map_err(|e| anyhow::anyhow!("failed to load embedding model '{model_path}': {e}"))?;
        let dimension = model.encode_single("dimension probe").len();
        tracing::info!(model = model_path, dimension, "embedding model loaded");
        Ok(Self { model, dimension })
    }
}

#[cfg(feature = "semantic")]
impl EmbeddingEncoder for Model2VecEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut v = self.model.encode_single(text);
        l2_normalize(&mut v);
        v
    }

    fn encode_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut vectors = self.model.encode(texts);
        for v in &mut vectors {
            l2_normalize(v);
        }
        vectors
    }
}

/// Deterministic hash-based pseudo-embedding (§9: "a test build MAY
/// substitute a deterministic hash-based pseudo-embedding to avoid pulling a
/// model into unit tests"). Not semantically meaningful — it only guarantees
/// that identical text hashes to an identical vector, which is enough to
/// exercise discovery's scoring and ranking logic without a network
/// dependency.
pub struct HashEncoder {
    dimension: usize,
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingEncoder for HashEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            hasher.write(token.as_bytes());
            hasher.write_usize(i);
            let h = hasher.finish();
            let idx = (h as usize) % self.dimension;
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_stays_zero() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn dot_product_of_normalized_vectors_is_cosine() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![4.0, 3.0];
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        let cosine = dot_product(&a, &b);
        assert!((cosine - 0.96).abs() < 1e-6);
    }

    #[test]
    fn hash_encoder_is_deterministic() {
        let enc = HashEncoder::new(64);
        let a = enc.encode("take a screenshot");
        let b = enc.encode("take a screenshot");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_encoder_respects_dimension() {
        let enc = HashEncoder::new(32);
        assert_eq!(enc.dimension(), 32);
        assert_eq!(enc.encode("anything").len(), 32);
    }

    #[test]
    fn hash_encoder_distinguishes_different_text() {
        let enc = HashEncoder::new(64);
        let a = enc.encode("take a screenshot");
        let b = enc.encode("search the web");
        assert_ne!(a, b);
    }

    #[test]
    fn hash_encoder_output_is_finite_and_not_nan() {
        let enc = HashEncoder::new(64);
        let v = enc.encode("");
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
