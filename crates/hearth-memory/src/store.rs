//! Durable memory store backed by SQLite.
//!
//! Holds the typed records of the substrate: documents, their embedded
//! fragments, generic event memories, rooms, and entities. All writes are
//! keyed by deterministic identifiers, so concurrent writers converge
//! (create-if-absent) rather than conflict.
//!
//! Embeddings are stored as little-endian f32 BLOBs; similarity search loads
//! the agent's fragments and ranks by cosine similarity in process. Any
//! approximate-nearest-neighbor backend could be substituted behind
//! [`MemoryStore::search_by_embedding`] without touching callers.

use chrono::{DateTime, Utc};
use hearth_types::{
    AgentId, Document, DocumentId, Entity, EntityId, Fragment, FragmentId, HearthError,
    HearthResult, MemoryId, MemoryRecord, Relationship, RoomId, SourceTag,
};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A fragment annotated with its similarity to a query embedding.
#[derive(Debug, Clone)]
pub struct ScoredFragment {
    /// The matched fragment.
    pub fragment: Fragment,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
}

/// Memory store wrapping a shared SQLite connection.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Create a store wrapping the given connection. The schema must already
    /// be migrated (see [`crate::migration::run_migrations`]).
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Open (or create) a store at the given path and run migrations.
    pub fn open(path: impl AsRef<Path>) -> HearthResult<Self> {
        let conn = Connection::open(path).map_err(|e| HearthError::Storage(e.to_string()))?;
        crate::migration::run_migrations(&conn)
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Open an in-memory store with a migrated schema.
    pub fn open_in_memory() -> HearthResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| HearthError::Storage(e.to_string()))?;
        crate::migration::run_migrations(&conn)
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// The shared connection, for composing with other stores.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn lock(&self) -> HearthResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HearthError::Internal(e.to_string()))
    }

    // -- Documents --

    /// Persist a document verbatim. Re-inserting the same id supersedes the
    /// stored row (re-ingestion, not mutation).
    pub fn create_document(&self, doc: &Document) -> HearthResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents (id, agent_id, content, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET content = ?3, source = ?4",
            rusqlite::params![
                doc.id.0.to_string(),
                doc.agent_id.0.to_string(),
                doc.content,
                doc.source.as_str(),
                doc.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Point lookup; `Ok(None)` on miss.
    pub fn get_document(&self, id: DocumentId) -> HearthResult<Option<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, agent_id, content, source, created_at FROM documents WHERE id = ?1",
            )
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let result = stmt.query_row(rusqlite::params![id.0.to_string()], parse_document_row);
        match result {
            Ok(doc) => Ok(Some(doc)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HearthError::Storage(e.to_string())),
        }
    }

    /// Batch document fetch, preserving input order. Ids that fail to
    /// resolve are silently absent from the result.
    pub fn get_documents(&self, ids: &[DocumentId]) -> HearthResult<Vec<Document>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get_document(*id)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    // -- Fragments --

    /// Persist one fragment of a document.
    pub fn create_fragment(&self, agent_id: AgentId, frag: &Fragment) -> HearthResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO fragments (id, document_id, agent_id, position, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET content = ?5, embedding = ?6",
            rusqlite::params![
                frag.id.0.to_string(),
                frag.document_id.0.to_string(),
                agent_id.0.to_string(),
                frag.position as i64,
                frag.content,
                embedding_to_bytes(&frag.embedding),
                frag.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Similarity search over the agent's fragments.
    ///
    /// Ranks by cosine similarity descending with recency as the tiebreak
    /// (newer first), drops results below `min_similarity`, and truncates
    /// to `limit`.
    pub fn search_by_embedding(
        &self,
        query: &[f32],
        agent_id: AgentId,
        limit: usize,
        min_similarity: f32,
    ) -> HearthResult<Vec<ScoredFragment>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, position, content, embedding, created_at
                 FROM fragments WHERE agent_id = ?1",
            )
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![agent_id.0.to_string()], |row| {
                let embedding_bytes: Vec<u8> = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    embedding_bytes,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| HearthError::Storage(e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let (id_str, doc_str, position, content, embedding_bytes, created_str) =
                row.map_err(|e| HearthError::Storage(e.to_string()))?;
            let embedding = embedding_from_bytes(&embedding_bytes);
            let similarity = cosine_similarity(query, &embedding);
            if similarity < min_similarity {
                continue;
            }
            scored.push(ScoredFragment {
                fragment: Fragment {
                    id: FragmentId(parse_uuid(&id_str)?),
                    document_id: DocumentId(parse_uuid(&doc_str)?),
                    position: position as usize,
                    content,
                    embedding,
                    created_at: parse_datetime(&created_str),
                },
                similarity,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.fragment.created_at.cmp(&a.fragment.created_at))
        });
        scored.truncate(limit);
        debug!(
            results = scored.len(),
            limit, min_similarity, "embedding search complete"
        );
        Ok(scored)
    }

    // -- Memories --

    /// Insert a memory record with create-if-absent semantics.
    ///
    /// Re-creating an existing id with identical content is a benign no-op.
    /// The same id with *different* content is `DuplicateIdentifier`,
    /// never a silent overwrite.
    pub fn create_memory(&self, record: &MemoryRecord) -> HearthResult<()> {
        let conn = self.lock()?;
        let id_str = record.id.0.to_string();
        let content_str = serde_json::to_string(&record.content)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT content FROM memories WHERE id = ?1",
                rusqlite::params![id_str],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(HearthError::Storage(other.to_string())),
            })?;

        if let Some(stored) = existing {
            if stored == content_str {
                debug!(id = %record.id, "memory already exists with identical content");
                return Ok(());
            }
            return Err(HearthError::DuplicateIdentifier(id_str));
        }

        // INSERT OR IGNORE tolerates a concurrent identical create racing
        // the check above.
        conn.execute(
            "INSERT OR IGNORE INTO memories (id, room_id, entity_id, agent_id, content, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id_str,
                record.room_id.0.to_string(),
                record.entity_id.0.to_string(),
                record.agent_id.0.to_string(),
                content_str,
                record.source.as_str(),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Point lookup; `Ok(None)` on miss.
    pub fn get_memory(&self, id: MemoryId) -> HearthResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, room_id, entity_id, agent_id, content, source, created_at
                 FROM memories WHERE id = ?1",
            )
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let result = stmt.query_row(rusqlite::params![id.0.to_string()], parse_memory_row);
        match result {
            Ok(mem) => Ok(Some(mem)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(HearthError::Storage(e.to_string())),
        }
    }

    /// All memory records grouped under the given rooms.
    pub fn get_memories_by_rooms(&self, room_ids: &[RoomId]) -> HearthResult<Vec<MemoryRecord>> {
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = placeholders(room_ids.len());
        let sql = format!(
            "SELECT id, room_id, entity_id, agent_id, content, source, created_at
             FROM memories WHERE room_id IN ({placeholders})
             ORDER BY created_at DESC"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let id_strings: Vec<String> = room_ids.iter().map(|r| r.0.to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(id_strings.iter()), parse_memory_row)
            .map_err(|e| HearthError::Storage(e.to_string()))?;

        let mut memories = Vec::new();
        for row in rows {
            memories.push(row.map_err(|e| HearthError::Storage(e.to_string()))?);
        }
        Ok(memories)
    }

    /// The set of memory ids already present in the given rooms: the dedup
    /// set consulted before ingesting a new batch.
    pub fn memory_ids_in_rooms(&self, room_ids: &[RoomId]) -> HearthResult<HashSet<MemoryId>> {
        if room_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.lock()?;
        let placeholders = placeholders(room_ids.len());
        let sql = format!("SELECT id FROM memories WHERE room_id IN ({placeholders})");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let id_strings: Vec<String> = room_ids.iter().map(|r| r.0.to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(id_strings.iter()), |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| HearthError::Storage(e.to_string()))?;

        let mut ids = HashSet::new();
        for row in rows {
            let id_str = row.map_err(|e| HearthError::Storage(e.to_string()))?;
            ids.insert(MemoryId(parse_uuid(&id_str)?));
        }
        Ok(ids)
    }

    // -- Rooms --

    /// Idempotent upsert of a conversational container.
    pub fn ensure_room(&self, room_id: RoomId, agent_id: AgentId) -> HearthResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO rooms (id, agent_id, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                room_id.0.to_string(),
                agent_id.0.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether a room exists.
    pub fn room_exists(&self, room_id: RoomId) -> HearthResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1",
                rusqlite::params![room_id.0.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    // -- Entities --

    /// Create or update an entity, merging the latest names and metadata.
    pub fn upsert_entity(&self, entity: &Entity) -> HearthResult<()> {
        let conn = self.lock()?;
        let names = serde_json::to_string(&entity.names)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&entity.metadata)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO entities (id, names, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET names = ?2, metadata = ?3, updated_at = ?4",
            rusqlite::params![entity.id.0.to_string(), names, metadata, now],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Batch entity fetch. Missing ids are silently absent.
    pub fn get_entities_by_ids(&self, ids: &[EntityId]) -> HearthResult<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = placeholders(ids.len());
        let sql = format!("SELECT id, names, metadata FROM entities WHERE id IN ({placeholders})");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let id_strings: Vec<String> = ids.iter().map(|i| i.0.to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(id_strings.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| HearthError::Storage(e.to_string()))?;

        let mut entities = Vec::new();
        for row in rows {
            let (id_str, names_str, meta_str) =
                row.map_err(|e| HearthError::Storage(e.to_string()))?;
            entities.push(Entity {
                id: EntityId(parse_uuid(&id_str)?),
                names: serde_json::from_str(&names_str).unwrap_or_default(),
                metadata: serde_json::from_str(&meta_str).unwrap_or_default(),
            });
        }
        Ok(entities)
    }

    // -- Relationships --

    /// Create or update a directed edge, replacing its tags and metadata.
    pub fn upsert_relationship(&self, rel: &Relationship) -> HearthResult<()> {
        let conn = self.lock()?;
        let tags = serde_json::to_string(&rel.tags)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&rel.metadata)
            .map_err(|e| HearthError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO relationships (source_entity, target_entity, tags, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(source_entity, target_entity)
             DO UPDATE SET tags = ?3, metadata = ?4, updated_at = ?5",
            rusqlite::params![
                rel.source_entity.0.to_string(),
                rel.target_entity.0.to_string(),
                tags,
                metadata,
                now,
            ],
        )
        .map_err(|e| HearthError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All outgoing edges of an entity.
    pub fn get_relationships(&self, source: EntityId) -> HearthResult<Vec<Relationship>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT source_entity, target_entity, tags, metadata
                 FROM relationships WHERE source_entity = ?1",
            )
            .map_err(|e| HearthError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![source.0.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| HearthError::Storage(e.to_string()))?;

        let mut edges = Vec::new();
        for row in rows {
            let (source_str, target_str, tags_str, meta_str) =
                row.map_err(|e| HearthError::Storage(e.to_string()))?;
            edges.push(Relationship {
                source_entity: EntityId(parse_uuid(&source_str)?),
                target_entity: EntityId(parse_uuid(&target_str)?),
                tags: serde_json::from_str(&tags_str).unwrap_or_default(),
                metadata: serde_json::from_str(&meta_str).unwrap_or_default(),
            });
        }
        Ok(edges)
    }
}

// ---------------------------------------------------------------------------
// Row parsing and vector helpers
// ---------------------------------------------------------------------------

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_uuid(s: &str) -> HearthResult<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| HearthError::Storage(e.to_string()))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_source(s: &str) -> SourceTag {
    match s {
        "feed" => SourceTag::Feed,
        "document" => SourceTag::Document,
        "conversation" => SourceTag::Conversation,
        _ => SourceTag::System,
    }
}

fn parse_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let id_str: String = row.get(0)?;
    let agent_str: String = row.get(1)?;
    let content: String = row.get(2)?;
    let source_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    Ok(Document {
        id: DocumentId(uuid::Uuid::parse_str(&id_str).unwrap_or_default()),
        agent_id: AgentId(uuid::Uuid::parse_str(&agent_str).unwrap_or_default()),
        content,
        source: parse_source(&source_str),
        created_at: parse_datetime(&created_str),
    })
}

fn parse_memory_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id_str: String = row.get(0)?;
    let room_str: String = row.get(1)?;
    let entity_str: String = row.get(2)?;
    let agent_str: String = row.get(3)?;
    let content_str: String = row.get(4)?;
    let source_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    Ok(MemoryRecord {
        id: MemoryId(uuid::Uuid::parse_str(&id_str).unwrap_or_default()),
        room_id: RoomId(uuid::Uuid::parse_str(&room_str).unwrap_or_default()),
        entity_id: EntityId(uuid::Uuid::parse_str(&entity_str).unwrap_or_default()),
        agent_id: AgentId(uuid::Uuid::parse_str(&agent_str).unwrap_or_default()),
        content: serde_json::from_str(&content_str)
            .unwrap_or(serde_json::Value::String(content_str)),
        source: parse_source(&source_str),
        created_at: parse_datetime(&created_str),
        similarity: None,
    })
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1.0, 1.0] where 1.0 = identical direction.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an embedding to bytes for SQLite BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding from bytes.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    fn memory(room: RoomId, agent: AgentId, external_id: &str, text: &str) -> MemoryRecord {
        MemoryRecord {
            id: MemoryId::derive(external_id),
            room_id: room,
            entity_id: EntityId::derive("author-1"),
            agent_id: agent,
            content: json!({ "text": text }),
            source: SourceTag::Feed,
            created_at: Utc::now(),
            similarity: None,
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let store = setup();
        let agent = AgentId::new();
        let doc = Document::new(agent, "Rust is a systems language", SourceTag::Document);
        store.create_document(&doc).unwrap();

        let loaded = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.content, "Rust is a systems language");
        assert_eq!(loaded.agent_id, agent);
        assert_eq!(loaded.source, SourceTag::Document);
    }

    #[test]
    fn test_get_document_miss_is_none() {
        let store = setup();
        assert!(store.get_document(DocumentId::new()).unwrap().is_none());
    }

    #[test]
    fn test_create_memory_idempotent() {
        let store = setup();
        let room = RoomId::derive("thread-1");
        let agent = AgentId::new();
        let record = memory(room, agent, "post-1", "hello");

        store.create_memory(&record).unwrap();
        // Identical re-create is a benign no-op
        store.create_memory(&record).unwrap();

        let memories = store.get_memories_by_rooms(&[room]).unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].text(), Some("hello"));
    }

    #[test]
    fn test_create_memory_conflicting_content_rejected() {
        let store = setup();
        let room = RoomId::derive("thread-1");
        let agent = AgentId::new();
        store.create_memory(&memory(room, agent, "post-1", "hello")).unwrap();

        let conflicting = memory(room, agent, "post-1", "different");
        let err = store.create_memory(&conflicting).unwrap_err();
        assert!(matches!(err, HearthError::DuplicateIdentifier(_)));
    }

    #[test]
    fn test_memory_ids_in_rooms() {
        let store = setup();
        let room_a = RoomId::derive("a");
        let room_b = RoomId::derive("b");
        let agent = AgentId::new();
        store.create_memory(&memory(room_a, agent, "1", "x")).unwrap();
        store.create_memory(&memory(room_a, agent, "2", "y")).unwrap();
        store.create_memory(&memory(room_b, agent, "3", "z")).unwrap();

        let ids = store.memory_ids_in_rooms(&[room_a]).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&MemoryId::derive("1")));
        assert!(!ids.contains(&MemoryId::derive("3")));

        let all = store.memory_ids_in_rooms(&[room_a, room_b]).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_search_by_embedding_ranking_and_threshold() {
        let store = setup();
        let agent = AgentId::new();
        let doc = Document::new(agent, "doc", SourceTag::Document);
        store.create_document(&doc).unwrap();

        let mk = |pos: usize, content: &str, embedding: Vec<f32>| Fragment {
            id: FragmentId::derive(doc.id, pos),
            document_id: doc.id,
            position: pos,
            content: content.to_string(),
            embedding,
            created_at: Utc::now(),
        };
        store.create_fragment(agent, &mk(0, "rust", vec![0.9, 0.1, 0.0])).unwrap();
        store.create_fragment(agent, &mk(1, "python", vec![0.0, 0.1, 0.9])).unwrap();
        store.create_fragment(agent, &mk(2, "mixed", vec![0.5, 0.5, 0.0])).unwrap();

        let results = store
            .search_by_embedding(&[1.0, 0.0, 0.0], agent, 10, 0.5)
            .unwrap();
        // "python" is below the threshold; "rust" ranks above "mixed"
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].fragment.content, "rust");
        assert_eq!(results[1].fragment.content, "mixed");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[test]
    fn test_search_scoped_to_agent() {
        let store = setup();
        let agent_a = AgentId::new();
        let agent_b = AgentId::new();
        let doc = Document::new(agent_a, "doc", SourceTag::Document);
        store.create_document(&doc).unwrap();
        let frag = Fragment {
            id: FragmentId::derive(doc.id, 0),
            document_id: doc.id,
            position: 0,
            content: "only for a".to_string(),
            embedding: vec![1.0, 0.0],
            created_at: Utc::now(),
        };
        store.create_fragment(agent_a, &frag).unwrap();

        let for_b = store.search_by_embedding(&[1.0, 0.0], agent_b, 10, 0.0).unwrap();
        assert!(for_b.is_empty());
    }

    #[test]
    fn test_search_limit() {
        let store = setup();
        let agent = AgentId::new();
        let doc = Document::new(agent, "doc", SourceTag::Document);
        store.create_document(&doc).unwrap();
        for pos in 0..10 {
            let frag = Fragment {
                id: FragmentId::derive(doc.id, pos),
                document_id: doc.id,
                position: pos,
                content: format!("frag {pos}"),
                embedding: vec![1.0, 0.0],
                created_at: Utc::now(),
            };
            store.create_fragment(agent, &frag).unwrap();
        }
        let results = store.search_by_embedding(&[1.0, 0.0], agent, 3, 0.0).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_ensure_room_idempotent() {
        let store = setup();
        let room = RoomId::derive("thread-9");
        let agent = AgentId::new();
        store.ensure_room(room, agent).unwrap();
        store.ensure_room(room, agent).unwrap();
        assert!(store.room_exists(room).unwrap());
    }

    #[test]
    fn test_entity_upsert_and_batch_fetch() {
        let store = setup();
        let alice = Entity {
            id: EntityId::derive("alice"),
            names: vec!["Alice".to_string(), "al".to_string()],
            metadata: Default::default(),
        };
        store.upsert_entity(&alice).unwrap();

        // Upsert replaces names
        let renamed = Entity {
            names: vec!["Alice".to_string()],
            ..alice.clone()
        };
        store.upsert_entity(&renamed).unwrap();

        let missing = EntityId::derive("nobody");
        let found = store.get_entities_by_ids(&[alice.id, missing]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].names, vec!["Alice".to_string()]);
    }

    #[test]
    fn test_relationship_upsert_and_fetch() {
        let store = setup();
        let me = EntityId::derive("me");
        let alice = EntityId::derive("alice");

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("interactions".to_string(), json!(3));
        let edge = Relationship {
            source_entity: me,
            target_entity: alice,
            tags: vec!["follows".to_string()],
            metadata,
        };
        store.upsert_relationship(&edge).unwrap();

        // Re-upserting the same pair updates in place
        let mut bumped = edge.clone();
        bumped.metadata.insert("interactions".to_string(), json!(4));
        store.upsert_relationship(&bumped).unwrap();

        let edges = store.get_relationships(me).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_entity, alice);
        assert_eq!(edges[0].interactions(), Some(4));

        assert!(store.get_relationships(alice).unwrap().is_empty());
    }

    #[test]
    fn test_store_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let agent = AgentId::new();
        let doc = Document::new(agent, "persisted", SourceTag::Document);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.create_document(&doc).unwrap();
        }
        let store = MemoryStore::open(&path).unwrap();
        let loaded = store.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.content, "persisted");
    }

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let embedding = vec![0.1, -0.5, 1.25, 0.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(embedding_from_bytes(&bytes), embedding);
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
