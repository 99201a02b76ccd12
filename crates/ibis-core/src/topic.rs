//! Topic types.
//!
//! A topic is a node in a directed acyclic generalization hierarchy. Topics
//! are typed (person, place, …) and may declare the attribute keys that facts
//! using them as context are allowed to carry.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::id::TopicId;

// ─── Kind ────────────────────────────────────────────────────────────────────

/// What a topic stands for. Person and place topics double as the typed
/// references recall queries filter on.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopicKind {
  Person,
  Place,
  Organization,
  TimePeriod,
  #[default]
  Generic,
  /// Escape hatch for kinds outside the built-in taxonomy.
  #[strum(default)]
  Custom(String),
}

impl TopicKind {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Person => "person",
      Self::Place => "place",
      Self::Organization => "organization",
      Self::TimePeriod => "time_period",
      Self::Generic => "generic",
      Self::Custom(name) => name,
    }
  }

  /// Whether the kind reads back as itself from its name. Custom names must
  /// be trimmed, non-empty and distinct from every built-in kind.
  pub fn is_canonical(&self) -> bool {
    !self.as_str().is_empty() && parse_kind(self.as_str()) == *self
  }
}

impl fmt::Display for TopicKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Topic ───────────────────────────────────────────────────────────────────

/// A topic record. Child links are derived by [`crate::graph::TopicGraph`] and
/// are not part of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
  pub topic_id:    TopicId,
  /// Unique among topics of the same kind, aliases included.
  pub name:        String,
  pub kind:        TopicKind,
  /// Long-form discussion of the topic.
  #[serde(default)]
  pub description: String,
  pub parents:     BTreeSet<TopicId>,
  #[serde(default)]
  pub aliases:     BTreeSet<String>,
  /// Attribute keys facts may carry when this topic is their context.
  #[serde(default)]
  pub schema:      BTreeSet<String>,
}

impl Topic {
  /// The primary name followed by every alias.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
  }

  pub fn is_root(&self) -> bool { self.parents.is_empty() }

  /// Whether a payload key is allowed by this topic's schema. An empty schema
  /// allows everything.
  pub fn declares(&self, key: &str) -> bool {
    self.schema.is_empty() || self.schema.contains(key)
  }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

// ─── NewTopic ────────────────────────────────────────────────────────────────

/// Input to [`crate::graph::TopicGraph::create`].
#[derive(Debug, Clone, Default)]
pub struct NewTopic {
  pub name:        String,
  pub kind:        TopicKind,
  pub description: String,
  pub parents:     BTreeSet<TopicId>,
  pub aliases:     BTreeSet<String>,
  pub schema:      BTreeSet<String>,
}

impl NewTopic {
  pub fn new(name: impl Into<String>, kind: TopicKind) -> Self {
    Self { name: name.into(), kind, ..Self::default() }
  }

  pub fn with_parent(mut self, parent: TopicId) -> Self {
    self.parents.insert(parent);
    self
  }

  pub fn with_parents(mut self, parents: impl IntoIterator<Item = TopicId>) -> Self {
    self.parents.extend(parents);
    self
  }

  pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
    self.aliases.insert(alias.into());
    self
  }

  pub fn with_schema_key(mut self, key: impl Into<String>) -> Self {
    self.schema.insert(key.into());
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }
}

/// Parse a topic kind from user input. Never fails: unknown names become
/// [`TopicKind::Custom`].
pub fn parse_kind(s: &str) -> TopicKind {
  TopicKind::from_str(s.trim()).unwrap_or_default()
}
