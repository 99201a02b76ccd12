//! Fact types: atomic, sourced claims.
//!
//! A fact is a statement filed under one or more topics and backed by one or
//! more sources. Key-value facts additionally carry a typed payload used for
//! aggregation ("Rome - population: 200").

use std::{
  cmp::Ordering,
  collections::{BTreeMap, BTreeSet},
  fmt,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  graph::TopicGraph,
  id::{FactId, PeriodId, SourceId, TopicId},
};

// ─── Payload ─────────────────────────────────────────────────────────────────

/// A typed attribute value.
///
/// Values are totally ordered so they can key range postings: values of
/// different types order by type (number < date < text < topic), numbers by
/// [`f64::total_cmp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PayloadValue {
  Number(f64),
  Date(NaiveDate),
  Text(String),
  /// A reference to a topic, e.g. the person a quote is attributed to.
  Topic(TopicId),
}

impl PayloadValue {
  fn rank(&self) -> u8 {
    match self {
      Self::Number(_) => 0,
      Self::Date(_) => 1,
      Self::Text(_) => 2,
      Self::Topic(_) => 3,
    }
  }

  /// Whether both values carry the same type.
  pub fn same_type(&self, other: &Self) -> bool { self.rank() == other.rank() }

  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Number(_) => "number",
      Self::Date(_) => "date",
      Self::Text(_) => "text",
      Self::Topic(_) => "topic",
    }
  }

  pub fn as_topic(&self) -> Option<TopicId> {
    match self {
      Self::Topic(id) => Some(*id),
      _ => None,
    }
  }

  /// Check the value is well-formed and normalise it.
  pub(crate) fn validated(self, graph: &TopicGraph) -> Result<Self> {
    match self {
      Self::Number(n) if !n.is_finite() => {
        Err(Error::invalid(format!("numeric attributes must be finite, got {n}")))
      }
      // -0.0 and 0.0 must share a posting.
      Self::Number(n) if n == 0.0 => Ok(Self::Number(0.0)),
      Self::Topic(id) => {
        graph.topic(id)?;
        Ok(self)
      }
      other => Ok(other),
    }
  }
}

impl PartialEq for PayloadValue {
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for PayloadValue {}

impl PartialOrd for PayloadValue {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for PayloadValue {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
      (Self::Date(a), Self::Date(b)) => a.cmp(b),
      (Self::Text(a), Self::Text(b)) => a.cmp(b),
      (Self::Topic(a), Self::Topic(b)) => a.cmp(b),
      _ => self.rank().cmp(&other.rank()),
    }
  }
}

impl fmt::Display for PayloadValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Number(n) => write!(f, "{n}"),
      Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
      Self::Text(s) => f.write_str(s),
      Self::Topic(id) => write!(f, "topic:{id}"),
    }
  }
}

// ─── Fact ────────────────────────────────────────────────────────────────────

/// A recorded claim. `topics` and `sources` are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
  pub fact_id:       FactId,
  pub statement:     String,
  #[serde(default)]
  pub payload:       BTreeMap<String, PayloadValue>,
  /// The topic the statement is about, e.g. `Rome` for "population: 200".
  /// Always a member of `topics`.
  pub context:       Option<TopicId>,
  /// The shared period the claim takes place in.
  pub period:        Option<PeriodId>,
  pub topics:        BTreeSet<TopicId>,
  pub sources:       BTreeSet<SourceId>,
  /// The fact this one restates from a different source. It was recorded no
  /// later than this one.
  pub restated_from: Option<FactId>,
  pub created_at:    DateTime<Utc>,
  pub modified_at:   DateTime<Utc>,
}

impl Fact {
  pub fn has_topic(&self, topic: TopicId) -> bool { self.topics.contains(&topic) }

  pub fn cites(&self, source: SourceId) -> bool { self.sources.contains(&source) }

  /// Topics referenced from the payload.
  pub fn mentions(&self) -> impl Iterator<Item = TopicId> + '_ {
    self.payload.values().filter_map(PayloadValue::as_topic)
  }

  /// Human-readable rendering, resolving topic names through `graph`, e.g.
  /// `Rome - Census of 14 AD (population: 4937000)`.
  pub fn describe(&self, graph: &TopicGraph) -> String {
    let name_of = |id: TopicId| {
      graph.get(id).map(|t| t.name.clone()).unwrap_or_else(|| id.to_string())
    };
    let mut out = String::new();
    if let Some(context) = self.context {
      out.push_str(&name_of(context));
      out.push_str(" - ");
    }
    out.push_str(&self.statement);
    if !self.payload.is_empty() {
      let attributes: Vec<String> = self
        .payload
        .iter()
        .map(|(key, value)| match value {
          PayloadValue::Topic(id) => format!("{key}: {}", name_of(*id)),
          other => format!("{key}: {other}"),
        })
        .collect();
      out.push_str(&format!(" ({})", attributes.join(", ")));
    }
    out
  }
}

// ─── NewFact ─────────────────────────────────────────────────────────────────

/// Input to [`crate::fact_store::FactStore::record`]. Timestamps are assigned
/// by the store.
#[derive(Debug, Clone, Default)]
pub struct NewFact {
  pub statement:     String,
  pub payload:       BTreeMap<String, PayloadValue>,
  pub context:       Option<TopicId>,
  pub period:        Option<PeriodId>,
  pub topics:        BTreeSet<TopicId>,
  pub sources:       BTreeSet<SourceId>,
  pub restated_from: Option<FactId>,
}

impl NewFact {
  pub fn new(statement: impl Into<String>) -> Self {
    Self { statement: statement.into(), ..Self::default() }
  }

  pub fn with_topic(mut self, topic: TopicId) -> Self {
    self.topics.insert(topic);
    self
  }

  pub fn with_topics(mut self, topics: impl IntoIterator<Item = TopicId>) -> Self {
    self.topics.extend(topics);
    self
  }

  pub fn with_source(mut self, source: SourceId) -> Self {
    self.sources.insert(source);
    self
  }

  pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
    self.sources.extend(sources);
    self
  }

  /// Name the fact's context topic; it is added to the topic set as well.
  pub fn with_context(mut self, topic: TopicId) -> Self {
    self.context = Some(topic);
    self.topics.insert(topic);
    self
  }

  pub fn with_attribute(mut self, key: impl Into<String>, value: PayloadValue) -> Self {
    self.payload.insert(key.into(), value);
    self
  }

  pub fn with_period(mut self, period: PeriodId) -> Self {
    self.period = Some(period);
    self
  }

  pub fn restating(mut self, earlier: FactId) -> Self {
    self.restated_from = Some(earlier);
    self
  }
}
