//! Error types for `ibis-core`.

use thiserror::Error;

use crate::{
  id::{FactId, PeriodId, SourceId, TopicId},
  topic::TopicKind,
};

#[derive(Debug, Error)]
pub enum Error {
  /// Linking `child` under `parent` would close a loop in the hierarchy.
  #[error("linking {child} under {parent} would create a cycle")]
  Cycle { child: TopicId, parent: TopicId },

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("fact {0} must keep at least one topic")]
  LastTopic(FactId),

  #[error("fact {0} must keep at least one source")]
  LastSource(FactId),

  #[error("topic {0} must keep at least one parent")]
  Orphan(TopicId),

  #[error("source {source_id} is still cited by {facts} fact(s)")]
  SourceReferenced { source_id: SourceId, facts: usize },

  #[error("topic {topic_id} is still referenced by {facts} fact(s)")]
  TopicReferenced { topic_id: TopicId, facts: usize },

  #[error("fact {fact_id} is tagged with {topic_id} but has no assignment")]
  UnassignedFact { topic_id: TopicId, fact_id: FactId },

  #[error("a {kind} topic named {name:?} already exists")]
  DuplicateName { kind: TopicKind, name: String },

  #[error("topic not found: {0}")]
  TopicNotFound(TopicId),

  #[error("no topic named {0:?}")]
  TopicNameNotFound(String),

  #[error("source not found: {0}")]
  SourceNotFound(SourceId),

  #[error("period not found: {0}")]
  PeriodNotFound(PeriodId),

  #[error("fact not found: {0}")]
  FactNotFound(FactId),

  #[error("search index diverged from rebuild: {incremental} != {rebuilt}")]
  IndexDiverged { incremental: String, rebuilt: String },
}

impl Error {
  /// Whether the error reports an unknown id or name.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::TopicNotFound(_)
        | Self::TopicNameNotFound(_)
        | Self::SourceNotFound(_)
        | Self::PeriodNotFound(_)
        | Self::FactNotFound(_)
    )
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
