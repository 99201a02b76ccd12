//! Configurable integrity rules.

use serde::{Deserialize, Serialize};

/// Rules applied by [`crate::KnowledgeBase`] unless an individual call
/// overrides them. Both default to the permissive setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
  /// Refuse to unlink a topic's last parent, directly or by deleting it.
  pub require_rooted:         bool,
  /// Splits must assign every fact tagged with the split topic.
  pub require_full_partition: bool,
}
