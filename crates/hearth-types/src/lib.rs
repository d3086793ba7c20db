//! Core types and traits shared across the Hearth agent platform.
//!
//! Everything an integration needs to talk to the memory substrate and the
//! sync layer lives here: typed identifiers (deterministically derivable
//! from external identity), durable record shapes, the shared error enum,
//! and the capability traits implemented by collaborators (embedding,
//! external fetch, cache backend).

pub mod error;
pub mod id;
pub mod record;
pub mod traits;

pub use error::{HearthError, HearthResult};
pub use id::{AgentId, DocumentId, EntityId, FragmentId, MemoryId, RoomId};
pub use record::{Document, Entity, FeedItem, Fragment, MemoryRecord, Relationship, SourceTag};
pub use traits::{CacheStore, EmbeddingProvider, ExternalFetcher};
