//! Capability traits implemented by collaborators outside this core.

use crate::error::HearthResult;
use async_trait::async_trait;

/// A key-value cache backend.
///
/// Deliberately dumb: no expiry, no staleness policy. Callers that care
/// about freshness embed a timestamp in the cached payload and compare it
/// against their own interval. A read failure is an error, not a miss;
/// callers must treat the two differently.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a cached value. `Ok(None)` is a legitimate miss.
    async fn get(&self, key: &str) -> HearthResult<Option<serde_json::Value>>;

    /// Store a value under a key, overwriting any previous value.
    async fn set(&self, key: &str, value: serde_json::Value) -> HearthResult<()>;
}

/// Computes text embeddings. May fail transiently.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for one text.
    async fn embed(&self, text: &str) -> HearthResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts.
    async fn embed_batch(&self, texts: &[&str]) -> HearthResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize;
}

/// One call against a rate-limited external endpoint, supplied per
/// integration. The sync layer is agnostic to the payload shape.
#[async_trait]
pub trait ExternalFetcher: Send + Sync {
    /// Fetch the integration's current external state.
    async fn fetch(&self) -> HearthResult<serde_json::Value>;
}
