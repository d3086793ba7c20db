//! Durable record shapes stored by the memory substrate.

use crate::id::{AgentId, DocumentId, EntityId, FragmentId, MemoryId, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where an ingested record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// From an external social feed.
    Feed,
    /// From an ingested document.
    Document,
    /// From a conversation/interaction.
    Conversation,
    /// From a system event.
    System,
}

impl SourceTag {
    /// Stable string form used in derived identifiers and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Feed => "feed",
            SourceTag::Document => "document",
            SourceTag::Conversation => "conversation",
            SourceTag::System => "system",
        }
    }
}

/// An ingested unit of knowledge. Immutable once stored; re-ingestion under
/// the same id supersedes rather than mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable id, derivable from content + source.
    pub id: DocumentId,
    /// The agent that owns this document.
    pub agent_id: AgentId,
    /// Raw text content, stored verbatim.
    pub content: String,
    /// Where this document came from.
    pub source: SourceTag,
    /// When this document was ingested.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Build a document with its id derived from source + content.
    pub fn new(agent_id: AgentId, content: impl Into<String>, source: SourceTag) -> Self {
        let content = content.into();
        Self {
            id: DocumentId::derive(source.as_str(), &content),
            agent_id,
            content,
            source,
            created_at: Utc::now(),
        }
    }
}

/// A bounded slice of a document's text plus its embedding vector.
///
/// Created in a batch when the parent document is ingested; read-only
/// afterward. Conceptually cascades with its document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Deterministic id: a pure function of (document id, position).
    pub id: FragmentId,
    /// The parent document.
    pub document_id: DocumentId,
    /// Zero-based position within the document's chunk sequence.
    pub position: usize,
    /// The normalized text slice.
    pub content: String,
    /// Embedding vector for similarity search.
    pub embedding: Vec<f32>,
    /// When this fragment was created.
    pub created_at: DateTime<Utc>,
}

/// A generic durable record of an observed event (message, post, reconciled
/// external item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Deterministic id derived from the stable external identifier.
    pub id: MemoryId,
    /// Grouping key for deduplication (conversation thread).
    pub room_id: RoomId,
    /// Who authored the event.
    pub entity_id: EntityId,
    /// The agent that observed this event.
    pub agent_id: AgentId,
    /// Content payload; the `text` field carries the visible text.
    pub content: serde_json::Value,
    /// Where this memory came from.
    pub source: SourceTag,
    /// When this memory was created.
    pub created_at: DateTime<Utc>,
    /// Similarity annotation populated on query results, never stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl MemoryRecord {
    /// The visible text of this memory's payload, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.get("text").and_then(|v| v.as_str())
    }
}

/// A person or account referenced by memories and relationships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id derived from the external account identifier.
    pub id: EntityId,
    /// Known names/aliases for this entity.
    pub names: Vec<String>,
    /// Arbitrary metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A directed edge from one entity to another, carrying tags and metadata.
///
/// The interaction-count signal lives in `metadata["interactions"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// The entity this edge originates from.
    pub source_entity: EntityId,
    /// The entity this edge points at.
    pub target_entity: EntityId,
    /// Tag set describing the relationship.
    pub tags: Vec<String>,
    /// Arbitrary metadata, including the interaction count.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Relationship {
    /// The interaction-count signal, if present.
    pub fn interactions(&self) -> Option<u64> {
        self.metadata.get("interactions").and_then(|v| v.as_u64())
    }
}

/// A fully-parsed item from an external feed.
///
/// Raw feed payloads are loosely typed: the same logical field appears under
/// several names depending on the endpoint that produced it. `from_raw`
/// applies each fallback rule exactly once and fails closed, so the rest of
/// the system never touches the raw shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// The source's stable identifier for this item.
    pub external_id: String,
    /// The source's identifier for the containing conversation.
    pub conversation_id: String,
    /// The source's identifier for the author.
    pub author_id: String,
    /// Visible text of the item.
    pub text: String,
    /// When the item was published.
    pub timestamp: DateTime<Utc>,
}

impl FeedItem {
    /// Parse a raw feed payload into a typed item.
    ///
    /// Returns `None` when no identifier or text variant matches; callers
    /// skip unparseable items rather than guessing.
    pub fn from_raw(raw: &serde_json::Value) -> Option<Self> {
        let external_id = string_field(raw, &["id", "id_str", "rest_id"])?;
        let text = string_field(raw, &["text", "full_text"])?;
        // An item with no thread reference starts its own conversation.
        let conversation_id = string_field(raw, &["conversation_id", "in_reply_to_status_id"])
            .unwrap_or_else(|| external_id.clone());
        let author_id = string_field(raw, &["user_id", "author_id"])
            .or_else(|| raw.get("user").and_then(|u| string_field(u, &["id_str", "id"])))?;
        let timestamp = parse_timestamp(raw).unwrap_or_else(Utc::now);

        Some(Self {
            external_id,
            conversation_id,
            author_id,
            text,
            timestamp,
        })
    }

    /// Derived memory id for this item.
    pub fn memory_id(&self) -> MemoryId {
        MemoryId::derive(&self.external_id)
    }

    /// Derived room id for this item's conversation.
    pub fn room_id(&self) -> RoomId {
        RoomId::derive(&self.conversation_id)
    }

    /// Derived entity id for this item's author.
    pub fn author_entity_id(&self) -> EntityId {
        EntityId::derive(&self.author_id)
    }
}

/// Read the first matching field as a string, accepting string or integer
/// JSON values.
fn string_field(raw: &serde_json::Value, names: &[&str]) -> Option<String> {
    for name in names {
        match raw.get(name) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Read the item timestamp: unix seconds under `timestamp`, or an RFC 3339
/// string under `created_at`.
fn parse_timestamp(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = raw.get("timestamp").and_then(|v| v.as_i64()) {
        return DateTime::<Utc>::from_timestamp(secs, 0);
    }
    let s = raw.get("created_at")?.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
