//! Merges a freshly fetched feed timeline into durable memory.
//!
//! Reconciliation is what makes repeated syncs idempotent: every item's
//! memory id is derived from its external id, so "have we seen this" is a
//! set lookup against the memories already stored in the item's rooms. Only
//! unseen items authored by someone other than the agent itself are
//! ingested.

use hearth_memory::MemoryStore;
use hearth_types::{
    AgentId, CacheStore, Entity, EntityId, FeedItem, HearthError, HearthResult, MemoryRecord,
    RoomId, SourceTag,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items examined.
    pub scanned: usize,
    /// Items newly persisted as memories.
    pub created: usize,
    /// Items skipped because a memory with the derived id already existed.
    pub skipped_existing: usize,
    /// Items skipped because the agent itself authored them.
    pub skipped_self: usize,
    /// Items skipped because persisting them failed.
    pub failed: usize,
}

/// Reconcile a batch of feed items against stored memories.
///
/// `self_entity` is the agent's own external identity; items it authored
/// are not re-ingested as observations. A single item's failure is logged
/// and skipped so the rest of the batch lands.
pub async fn reconcile(
    store: &MemoryStore,
    cache: &dyn CacheStore,
    agent_id: AgentId,
    self_entity: EntityId,
    items: &[FeedItem],
) -> HearthResult<ReconcileReport> {
    let mut report = ReconcileReport {
        scanned: items.len(),
        ..Default::default()
    };
    if items.is_empty() {
        return Ok(report);
    }

    // One set lookup covers the whole batch: collect every room the batch
    // touches, then pull the memory ids already stored there.
    let mut rooms: Vec<RoomId> = Vec::new();
    for item in items {
        let room = item.room_id();
        if !rooms.contains(&room) {
            rooms.push(room);
        }
    }
    let existing = store.memory_ids_in_rooms(&rooms)?;

    for item in items {
        if existing.contains(&item.memory_id()) {
            report.skipped_existing += 1;
            continue;
        }
        if item.author_entity_id() == self_entity {
            report.skipped_self += 1;
            continue;
        }
        match ingest_item(store, cache, agent_id, item).await {
            Ok(()) => report.created += 1,
            Err(e) => {
                warn!(
                    external_id = %item.external_id,
                    error = %e,
                    "failed to reconcile feed item, skipping"
                );
                report.failed += 1;
            }
        }
    }

    debug!(
        scanned = report.scanned,
        created = report.created,
        skipped_existing = report.skipped_existing,
        skipped_self = report.skipped_self,
        "timeline reconciled"
    );
    Ok(report)
}

async fn ingest_item(
    store: &MemoryStore,
    cache: &dyn CacheStore,
    agent_id: AgentId,
    item: &FeedItem,
) -> HearthResult<()> {
    store.ensure_room(item.room_id(), agent_id)?;

    let mut metadata = HashMap::new();
    metadata.insert(
        "external_id".to_string(),
        serde_json::Value::String(item.author_id.clone()),
    );
    store.upsert_entity(&Entity {
        id: item.author_entity_id(),
        names: Vec::new(),
        metadata,
    })?;

    let record = MemoryRecord {
        id: item.memory_id(),
        room_id: item.room_id(),
        entity_id: item.author_entity_id(),
        agent_id,
        content: serde_json::json!({
            "text": item.text,
            "external_id": item.external_id,
            "conversation_id": item.conversation_id,
        }),
        source: SourceTag::Feed,
        created_at: item.timestamp,
        similarity: None,
    };
    match store.create_memory(&record) {
        // Another pass got there first; the item is stored either way.
        Ok(()) | Err(HearthError::DuplicateIdentifier(_)) => {}
        Err(e) => return Err(e),
    }

    // Keep the raw item around for inspection. Losing it is not worth
    // failing the batch over.
    let key = format!("feed/item/{}", item.external_id);
    match serde_json::to_value(item) {
        Ok(raw) => {
            if let Err(e) = cache.set(&key, raw).await {
                warn!(external_id = %item.external_id, error = %e, "failed to cache raw feed item");
            }
        }
        Err(e) => {
            warn!(external_id = %item.external_id, error = %e, "failed to serialize feed item");
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
