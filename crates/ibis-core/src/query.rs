//! Recall queries and their results.
//!
//! A [`Query`] combines three filter categories: topics (hierarchy-expanded),
//! payload attributes and a date range. Within the topic and attribute
//! categories postings are combined per [`MatchMode`]; across categories they
//! are always intersected.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  fact::PayloadValue,
  graph::TopicGraph,
  id::{FactId, TopicId},
  index::SearchIndex,
  period::DateRange,
  topic::TopicKind,
};

// ─── Filters ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
  /// A fact matches if any filter of the category matches.
  #[default]
  Any,
  /// A fact matches only if every filter of the category matches.
  All,
}

/// How a query names a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelector {
  Id(TopicId),
  /// A name or alias that must identify a single topic.
  Name(String),
  /// A name or alias within one kind, e.g. the person called "Paris".
  Typed(TopicKind, String),
}

impl TopicSelector {
  pub fn resolve(&self, graph: &TopicGraph) -> Result<TopicId> {
    match self {
      Self::Id(id) => graph.topic(*id).map(|t| t.topic_id),
      Self::Name(name) => graph.lookup(name).map(|t| t.topic_id),
      Self::Typed(kind, name) => graph
        .resolve(kind, name)
        .map(|t| t.topic_id)
        .ok_or_else(|| Error::TopicNameNotFound(name.trim().to_owned())),
    }
  }
}

impl From<TopicId> for TopicSelector {
  fn from(id: TopicId) -> Self { Self::Id(id) }
}

/// A filter over payload attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeFilter {
  /// The fact carries `key` with any value.
  Exists(String),
  Equals(String, PayloadValue),
  /// Inclusive range over values of one type; an open side is unbounded
  /// within that type.
  Range {
    key: String,
    min: Option<PayloadValue>,
    max: Option<PayloadValue>,
  },
}

impl AttributeFilter {
  pub fn key(&self) -> &str {
    match self {
      Self::Exists(key) | Self::Equals(key, _) | Self::Range { key, .. } => key,
    }
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// Parameters for [`SearchIndex::query`]. An empty query matches every fact.
#[derive(Debug, Clone, Default)]
pub struct Query {
  pub topics:     Vec<TopicSelector>,
  pub attributes: Vec<AttributeFilter>,
  /// Facts whose period overlaps this range.
  pub dates:      Option<DateRange>,
  pub mode:       MatchMode,
}

impl Query {
  pub fn new() -> Self { Self::default() }

  pub fn topic(mut self, topic: impl Into<TopicSelector>) -> Self {
    self.topics.push(topic.into());
    self
  }

  pub fn topic_named(mut self, name: impl Into<String>) -> Self {
    self.topics.push(TopicSelector::Name(name.into()));
    self
  }

  pub fn person(mut self, name: impl Into<String>) -> Self {
    self.topics.push(TopicSelector::Typed(TopicKind::Person, name.into()));
    self
  }

  pub fn place(mut self, name: impl Into<String>) -> Self {
    self.topics.push(TopicSelector::Typed(TopicKind::Place, name.into()));
    self
  }

  pub fn attribute(mut self, filter: AttributeFilter) -> Self {
    self.attributes.push(filter);
    self
  }

  pub fn equals(self, key: impl Into<String>, value: PayloadValue) -> Self {
    self.attribute(AttributeFilter::Equals(key.into(), value))
  }

  pub fn between(
    self,
    key: impl Into<String>,
    min: Option<PayloadValue>,
    max: Option<PayloadValue>,
  ) -> Self {
    self.attribute(AttributeFilter::Range { key: key.into(), min, max })
  }

  pub fn during(mut self, range: DateRange) -> Self {
    self.dates = Some(range);
    self
  }

  pub fn mode(mut self, mode: MatchMode) -> Self {
    self.mode = mode;
    self
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// The facts matching a query, ordered by creation time (ties broken by id).
///
/// Iteration is lazy and can be restarted by calling [`Hits::iter`] again;
/// it never yields more items than the snapshot holds facts.
#[derive(Debug, Clone)]
pub struct Hits<'a> {
  index: &'a SearchIndex,
  plan:  Plan,
}

#[derive(Debug, Clone)]
enum Plan {
  /// No filter: walk the whole chronology.
  Everything,
  /// Large result: walk the chronology and test membership.
  Scan(BTreeSet<FactId>),
  /// Small result: already sorted.
  Sorted(Vec<FactId>),
}

impl<'a> Hits<'a> {
  pub(crate) fn new(index: &'a SearchIndex, matched: Option<BTreeSet<FactId>>) -> Self {
    let plan = match matched {
      None => Plan::Everything,
      Some(ids) if ids.len().saturating_mul(4) >= index.len() => Plan::Scan(ids),
      Some(ids) => Plan::Sorted(index.in_creation_order(ids)),
    };
    Self { index, plan }
  }

  pub fn iter(&self) -> Box<dyn Iterator<Item = FactId> + '_> {
    match &self.plan {
      Plan::Everything => Box::new(self.index.chronological()),
      Plan::Scan(ids) => Box::new(self.index.chronological().filter(|id| ids.contains(id))),
      Plan::Sorted(ids) => Box::new(ids.iter().copied()),
    }
  }

  pub fn len(&self) -> usize {
    match &self.plan {
      Plan::Everything => self.index.len(),
      Plan::Scan(ids) => ids.len(),
      Plan::Sorted(ids) => ids.len(),
    }
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn contains(&self, id: FactId) -> bool {
    match &self.plan {
      Plan::Everything => self.index.contains(id),
      Plan::Scan(ids) => ids.contains(&id),
      Plan::Sorted(ids) => ids.contains(&id),
    }
  }

  pub fn to_vec(&self) -> Vec<FactId> { self.iter().collect() }

  /// The matches as a set, for comparisons that ignore order.
  pub fn to_set(&self) -> BTreeSet<FactId> { self.iter().collect() }
}

impl<'h, 'a> IntoIterator for &'h Hits<'a> {
  type Item = FactId;
  type IntoIter = Box<dyn Iterator<Item = FactId> + 'h>;

  fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Union or intersection of posting sets.
pub(crate) fn combine(mode: MatchMode, sets: Vec<BTreeSet<FactId>>) -> BTreeSet<FactId> {
  match mode {
    MatchMode::Any => sets.into_iter().flatten().collect(),
    MatchMode::All => intersect_all(sets).unwrap_or_default(),
  }
}

/// Intersection of every set, smallest first; `None` for no sets.
pub(crate) fn intersect_all(mut sets: Vec<BTreeSet<FactId>>) -> Option<BTreeSet<FactId>> {
  sets.sort_by_key(BTreeSet::len);
  let mut iter = sets.into_iter();
  let mut acc = iter.next()?;
  for set in iter {
    acc.retain(|id| set.contains(id));
    if acc.is_empty() {
      break;
    }
  }
  Some(acc)
}
