//! Core engine for the Ibis knowledge base.
//!
//! Ibis stores atomic, sourced facts organised by hierarchical topics. This
//! crate owns the in-memory graph (topics, sources, facts), the derived search
//! index, and the batch operations that restructure topics. It performs no
//! I/O; persistence backends implement [`store::SnapshotStore`].
//!
//! All writes go through a [`KnowledgeBase`] transaction. Readers take an
//! immutable [`Snapshot`] and are never blocked by, nor exposed to, an
//! in-progress write.

pub mod base;
pub mod batch;
pub mod error;
pub mod fact;
pub mod fact_store;
pub mod graph;
pub mod id;
pub mod index;
pub mod period;
pub mod policy;
pub mod query;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod topic;

pub use base::{KnowledgeBase, Transaction};
pub use error::{Error, Result};
pub use id::{FactId, PeriodId, SourceId, TopicId};
pub use policy::Policy;
pub use snapshot::{Records, Snapshot};

#[cfg(test)]
mod tests;
