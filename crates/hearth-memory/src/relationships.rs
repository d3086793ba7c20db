//! Renders an agent's relationship edges as a bounded textual summary.

use crate::store::MemoryStore;
use hearth_types::{Entity, EntityId, HearthResult, Relationship};
use std::collections::HashMap;
use tracing::debug;

/// Maximum number of relationships rendered in a summary.
const MAX_RELATIONSHIPS: usize = 30;

/// Separator between an entity's aliases.
const ALIAS_SEPARATOR: &str = " aka ";

/// Format an agent's relationship edges into a textual summary.
///
/// Keeps only edges carrying an interaction-count signal, ranks descending
/// by count, takes the top 30, dedups target identities, batch-resolves the
/// targets, and renders each as aliases + tags + metadata lines. Edges whose
/// target cannot be resolved are silently dropped. Returns an empty string
/// when nothing qualifies.
pub fn format_relationships(
    store: &MemoryStore,
    edges: &[Relationship],
) -> HearthResult<String> {
    let mut ranked: Vec<&Relationship> = edges
        .iter()
        .filter(|e| e.interactions().is_some())
        .collect();
    ranked.sort_by(|a, b| b.interactions().cmp(&a.interactions()));
    ranked.truncate(MAX_RELATIONSHIPS);

    // A relationship list may reference the same target under different tags
    let mut target_ids: Vec<EntityId> = Vec::new();
    let mut deduped: Vec<&Relationship> = Vec::new();
    for edge in ranked {
        if !target_ids.contains(&edge.target_entity) {
            target_ids.push(edge.target_entity);
            deduped.push(edge);
        }
    }

    if deduped.is_empty() {
        return Ok(String::new());
    }

    let entities = store.get_entities_by_ids(&target_ids)?;
    let by_id: HashMap<EntityId, &Entity> = entities.iter().map(|e| (e.id, e)).collect();

    let mut rendered = Vec::new();
    for edge in deduped {
        let Some(entity) = by_id.get(&edge.target_entity) else {
            debug!(target = %edge.target_entity, "dropping edge with unresolvable target");
            continue;
        };
        rendered.push(render_relationship(edge, entity));
    }

    Ok(rendered.join("\n\n"))
}

/// Load an entity's stored edges and format them.
pub fn summarize_relationships(store: &MemoryStore, source: EntityId) -> HearthResult<String> {
    let edges = store.get_relationships(source)?;
    format_relationships(store, &edges)
}

fn render_relationship(edge: &Relationship, entity: &Entity) -> String {
    let mut out = entity.names.join(ALIAS_SEPARATOR);
    if !edge.tags.is_empty() {
        out.push('\n');
        out.push_str(&edge.tags.join(", "));
    }
    // Deterministic metadata order
    let mut keys: Vec<&String> = edge.metadata.keys().collect();
    keys.sort();
    for key in keys {
        let value = &edge.metadata[key];
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push('\n');
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&rendered);
    }
    out
}
