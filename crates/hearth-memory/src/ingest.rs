//! Knowledge ingestion and retrieval.
//!
//! Ingestion persists the raw document, then normalizes, chunks, embeds and
//! persists each fragment. Retrieval is two-hop: embeddings are computed at
//! fragment granularity for precision, but the unit of knowledge returned
//! to a consumer is the whole parent document for context completeness.

use crate::chunk::{split_text, DEFAULT_MAX_LEN, DEFAULT_OVERLAP};
use crate::normalize::normalize;
use crate::store::MemoryStore;
use chrono::Utc;
use hearth_types::{
    AgentId, Document, DocumentId, EmbeddingProvider, Fragment, FragmentId, HearthResult,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// How many fragments a retrieval query considers.
const RETRIEVE_LIMIT: usize = 5;

/// Fragments below this similarity are never returned.
const MIN_SIMILARITY: f32 = 0.1;

/// The ingestion/retrieval pipeline over a memory store and an embedding
/// capability.
#[derive(Clone)]
pub struct KnowledgePipeline {
    store: MemoryStore,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgePipeline {
    /// Create a pipeline over the given store and embedding provider.
    pub fn new(store: MemoryStore, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Ingest a document: persist it verbatim, then chunk and embed its
    /// normalized text into fragments. Returns the number of fragments
    /// persisted.
    ///
    /// An empty normalization is a logged no-op, not an error. A single
    /// fragment's embedding failure is skipped so the rest of the batch
    /// proceeds; degraded retrieval beats total ingestion failure. Only
    /// the document write itself is fatal.
    pub async fn ingest(&self, doc: &Document) -> HearthResult<usize> {
        self.store.create_document(doc)?;

        let normalized = normalize(&doc.content);
        if normalized.is_empty() {
            debug!(document = %doc.id, "normalization yielded empty text, nothing to ingest");
            return Ok(0);
        }

        let chunks = split_text(&normalized, DEFAULT_MAX_LEN, DEFAULT_OVERLAP);
        let mut persisted = 0;
        for (position, chunk) in chunks.iter().enumerate() {
            let embedding = match self.embedder.embed(chunk).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        document = %doc.id,
                        position,
                        error = %e,
                        "embedding failed, skipping fragment"
                    );
                    continue;
                }
            };
            let fragment = Fragment {
                id: FragmentId::derive(doc.id, position),
                document_id: doc.id,
                position,
                content: chunk.clone(),
                embedding,
                created_at: Utc::now(),
            };
            self.store.create_fragment(doc.agent_id, &fragment)?;
            persisted += 1;
        }

        debug!(
            document = %doc.id,
            fragments = persisted,
            chunks = chunks.len(),
            "document ingested"
        );
        Ok(persisted)
    }

    /// Retrieve the documents most relevant to a query.
    ///
    /// Normalizes and embeds the query, searches fragments, dedups by
    /// parent document (multiple fragments of one document count once), and
    /// batch-fetches the parents in the order their best-matching fragment
    /// ranked. Documents that fail to resolve are dropped.
    pub async fn retrieve(&self, agent_id: AgentId, query: &str) -> HearthResult<Vec<Document>> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            debug!("query normalized to empty text, returning no results");
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(&normalized).await?;
        let matches = self.store.search_by_embedding(
            &query_embedding,
            agent_id,
            RETRIEVE_LIMIT,
            MIN_SIMILARITY,
        )?;

        let mut doc_ids: Vec<DocumentId> = Vec::new();
        for m in &matches {
            if !doc_ids.contains(&m.fragment.document_id) {
                doc_ids.push(m.fragment.document_id);
            }
        }

        self.store.get_documents(&doc_ids)
    }
}
