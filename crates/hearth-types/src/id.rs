//! Typed identifiers for records in the memory substrate.
//!
//! Every identifier that corresponds to something with a stable external
//! identity (a feed post, a conversation thread, a document's content) is
//! *derived*, not generated: the same external identity always maps to the
//! same UUID. This is what makes re-ingestion naturally idempotent, and the
//! dedup check in reconciliation a plain set lookup on derived ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Derive a stable UUID from a sequence of identity parts.
///
/// SHA-256 over the parts (length-prefixed so `["ab","c"]` and `["a","bc"]`
/// differ), truncated to 16 bytes, with the version nibble set to 8
/// (custom/name-based) and the RFC 4122 variant bits applied.
pub fn deterministic_uuid(parts: &[&str]) -> Uuid {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x80; // version 8
    bytes[8] = (bytes[8] & 0x3f) | 0x80; // RFC 4122 variant
    Uuid::from_bytes(bytes)
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for an agent.
    AgentId
}

uuid_id! {
    /// Unique identifier for a room (conversation thread / grouping key).
    RoomId
}

uuid_id! {
    /// Unique identifier for an entity (a person or account).
    EntityId
}

uuid_id! {
    /// Unique identifier for an ingested document.
    DocumentId
}

uuid_id! {
    /// Unique identifier for an embedded fragment of a document.
    FragmentId
}

uuid_id! {
    /// Unique identifier for a generic memory record.
    MemoryId
}

impl DocumentId {
    /// Derive a document id from its source tag and raw content.
    pub fn derive(source: &str, content: &str) -> Self {
        Self(deterministic_uuid(&["document", source, content]))
    }
}

impl FragmentId {
    /// Derive a fragment id from its parent document and position index.
    pub fn derive(document_id: DocumentId, position: usize) -> Self {
        let doc = document_id.0.to_string();
        let pos = position.to_string();
        Self(deterministic_uuid(&["fragment", &doc, &pos]))
    }
}

impl MemoryId {
    /// Derive a memory id from a stable external item identifier.
    pub fn derive(external_id: &str) -> Self {
        Self(deterministic_uuid(&["memory", external_id]))
    }
}

impl RoomId {
    /// Derive a room id from an external conversation identifier.
    pub fn derive(external_id: &str) -> Self {
        Self(deterministic_uuid(&["room", external_id]))
    }
}

impl EntityId {
    /// Derive an entity id from an external account identifier.
    pub fn derive(external_id: &str) -> Self {
        Self(deterministic_uuid(&["entity", external_id]))
    }
}
