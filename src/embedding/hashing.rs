//! Deterministic feature-hashing embedder.
//!
//! Each lowercase alphanumeric word is hashed (FNV-1a) into one of `dims`
//! buckets with a hash-derived sign, and the result is scaled to unit
//! length. Texts that share words land close together, which is enough
//! for keyword-style retrieval without network access or API keys.
//! Used for offline indexing, demos, and tests.

use async_trait::async_trait;

use travel_guide_core::embedding::{normalize, EmbeddingProvider};
use travel_guide_core::retry::ProviderError;

use crate::config::EmbeddingConfig;

pub const HASHING_MODEL: &str = "hashing-v1";
pub const DEFAULT_HASHING_DIMS: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashingProvider {
    model: String,
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self {
            model: HASHING_MODEL.to_string(),
            dims: dims.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut provider = Self::new(config.dims.unwrap_or(DEFAULT_HASHING_DIMS));
        if let Some(model) = &config.model {
            provider.model = model.clone();
        }
        provider
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use travel_guide_core::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let p = HashingProvider::new(64);
        assert_eq!(p.embed_one("Eiffel Tower"), p.embed_one("Eiffel Tower"));
        assert_eq!(p.embed_one("x").len(), 64);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let p = HashingProvider::new(128);
        assert_eq!(p.embed_one("Louvre, Paris!"), p.embed_one("louvre paris"));
    }

    #[test]
    fn test_shared_words_score_higher() {
        let p = HashingProvider::new(256);
        let query = p.embed_one("museums in Paris");
        let paris = p.embed_one("Paris has world famous museums such as the Louvre.");
        let tokyo = p.embed_one("Tokyo is known for sushi and the Shibuya crossing.");
        assert!(cosine_similarity(&query, &paris) > cosine_similarity(&query, &tokyo));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let p = HashingProvider::new(8);
        assert!(p.embed_one("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_config_overrides() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            model: Some("kw".into()),
            dims: Some(32),
            ..Default::default()
        };
        let p = HashingProvider::from_config(&config);
        assert_eq!((p.model_name(), p.dims()), ("kw", 32));
    }
}
