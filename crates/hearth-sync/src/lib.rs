//! External-service sync layer for the Hearth agent platform.
//!
//! Every integration talks to its rate-limited external source through the
//! same machinery:
//! - a [`queue::RequestQueue`] that serializes calls, retries with
//!   exponential backoff, and spaces requests with jitter;
//! - a [`service::SyncRegistry`] of per-integration background loops that
//!   refresh external state into the cache on a fixed interval;
//! - [`reconcile::reconcile`], which merges freshly fetched items with
//!   previously stored memories so only unseen items are ingested.

pub mod config;
pub mod queue;
pub mod reconcile;
pub mod service;

pub use config::SyncConfig;
pub use queue::{with_timeout, QueueConfig, RequestQueue, Task, DEFAULT_NETWORK_TIMEOUT};
pub use reconcile::{reconcile, ReconcileReport};
pub use service::{ServiceKey, SyncRegistry, SyncService};
