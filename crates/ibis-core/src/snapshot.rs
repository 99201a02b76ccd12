//! One consistent state of the knowledge base, and its serializable
//! [`Records`] form.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  error::Result,
  fact::Fact,
  fact_store::FactStore,
  graph::TopicGraph,
  id::{FactId, TopicId},
  index::SearchIndex,
  period::{Period, PeriodRegistry},
  query::{Hits, MatchMode, Query},
  source::{Source, SourceRegistry},
  topic::Topic,
};

/// Everything a backend needs to persist, in id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Records {
  #[serde(default)]
  pub topics:  Vec<Topic>,
  #[serde(default)]
  pub sources: Vec<Source>,
  #[serde(default)]
  pub periods: Vec<Period>,
  #[serde(default)]
  pub facts:   Vec<Fact>,
}

impl Records {
  pub fn is_empty(&self) -> bool {
    self.topics.is_empty()
      && self.sources.is_empty()
      && self.periods.is_empty()
      && self.facts.is_empty()
  }
}

/// The topic graph, source registry and fact store together with the search
/// index derived from them. Committed snapshots are immutable and shared
/// behind an `Arc`.
///
/// Each component sits behind its own `Arc` as well: a transaction copies a
/// component the first time it writes to it, and components it never touches
/// stay shared with the snapshot it started from.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub(crate) graph:   Arc<TopicGraph>,
  pub(crate) sources: Arc<SourceRegistry>,
  pub(crate) facts:   Arc<FactStore>,
  pub(crate) index:   Arc<SearchIndex>,
}

impl Snapshot {
  pub fn new() -> Self { Self::default() }

  pub fn topics(&self) -> &TopicGraph { &self.graph }

  pub fn sources(&self) -> &SourceRegistry { &self.sources }

  pub fn periods(&self) -> &PeriodRegistry { self.facts.periods() }

  pub fn facts(&self) -> &FactStore { &self.facts }

  pub fn index(&self) -> &SearchIndex { &self.index }

  pub fn query(&self, query: &Query) -> Result<Hits<'_>> { self.index.query(query, &self.graph) }

  pub fn query_by_topics(
    &self,
    topics: impl IntoIterator<Item = TopicId>,
    mode: MatchMode,
  ) -> Result<Hits<'_>> {
    self.facts.query_by_topics(topics, mode, &self.graph, &self.index)
  }

  /// The bibliography for a set of facts.
  pub fn sources_for_facts(
    &self,
    fact_ids: impl IntoIterator<Item = FactId>,
  ) -> Result<Vec<&Source>> {
    self.sources.sources_for_facts(fact_ids, &self.facts)
  }

  pub fn describe(&self, fact: FactId) -> Result<String> {
    Ok(self.facts.fact(fact)?.describe(&self.graph))
  }

  /// Check the incremental index against a rebuild.
  pub fn verify(&self) -> Result<()> { self.index.verify(&self.graph, &self.facts) }

  /// Replace the index with a rebuild.
  pub fn rebuild_index(&mut self) {
    self.index = Arc::new(SearchIndex::rebuild(&self.graph, &self.facts));
  }

  pub fn export(&self) -> Records {
    Records {
      topics:  self.graph.iter().cloned().collect(),
      sources: self.sources.iter().cloned().collect(),
      periods: self.periods().iter().cloned().collect(),
      facts:   self.facts.iter().cloned().collect(),
    }
  }

  /// Validate stored records and build a snapshot (and its index) from them.
  pub fn import(records: Records) -> Result<Self> {
    let graph = TopicGraph::from_records(records.topics)?;
    let sources = SourceRegistry::from_records(records.sources)?;
    let facts = FactStore::from_records(records.facts, records.periods, &graph, &sources)?;
    let index = SearchIndex::rebuild(&graph, &facts);
    debug!(
      topics = graph.len(),
      sources = sources.len(),
      periods = facts.periods().len(),
      facts = facts.len(),
      "imported snapshot"
    );
    Ok(Self {
      graph:   Arc::new(graph),
      sources: Arc::new(sources),
      facts:   Arc::new(facts),
      index:   Arc::new(index),
    })
  }

  /// Feed pending component deltas to the index.
  pub(crate) fn sync_index(&mut self) {
    let mut deltas = Vec::new();
    if self.graph.has_deltas() {
      deltas.extend(Arc::make_mut(&mut self.graph).take_deltas());
    }
    if self.facts.has_deltas() {
      deltas.extend(Arc::make_mut(&mut self.facts).take_deltas());
    }
    if !deltas.is_empty() {
      Arc::make_mut(&mut self.index).apply_all(deltas, &self.graph, &self.facts);
    }
  }
}
