//! The derived view recall queries are answered from.
//!
//! The index is a cache over [`TopicGraph`] and [`FactStore`]. It is kept up
//! to date incrementally by applying [`IndexDelta`]s, and
//! [`SearchIndex::rebuild`] recomputes it from scratch. The two must always
//! agree exactly; [`SearchIndex::verify`] checks that they do.
//!
//! Every structure is a `BTreeMap`/`BTreeSet` and empty entries are pruned,
//! so equal contents mean equal values and equal digests.

use std::{
  collections::{BTreeMap, BTreeSet},
  ops::Bound,
};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::{
  error::{Error, Result},
  fact::{Fact, PayloadValue},
  fact_store::FactStore,
  graph::TopicGraph,
  id::{FactId, TopicId},
  period::DateRange,
  query::{AttributeFilter, Hits, Query, combine, intersect_all},
};

/// A change the index must incorporate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDelta {
  /// A fact was created or edited.
  FactUpserted(FactId),
  FactRemoved(FactId),
  /// The ancestry of a topic (and so of its whole subgraph) changed.
  HierarchyChanged(TopicId),
}

/// What the index currently holds for one fact, so it can be unindexed
/// without consulting the (possibly already changed) fact store.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Document {
  created_at: DateTime<Utc>,
  /// Hierarchy-expanded topics.
  topics:     BTreeSet<TopicId>,
  attributes: Vec<(String, PayloadValue)>,
  period:     Option<DateRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchIndex {
  /// Topic → facts tagged with it or any of its descendants.
  topics:     BTreeMap<TopicId, BTreeSet<FactId>>,
  /// Attribute key → value → facts, value-ordered for range scans.
  attributes: BTreeMap<String, BTreeMap<PayloadValue, BTreeSet<FactId>>>,
  /// Period start → facts. `None` (open start) sorts first.
  periods:    BTreeMap<Option<NaiveDate>, BTreeSet<FactId>>,
  documents:  BTreeMap<FactId, Document>,
  chronology: BTreeSet<(DateTime<Utc>, FactId)>,
}

impl SearchIndex {
  pub fn new() -> Self { Self::default() }

  /// Recompute the index from the authoritative state.
  pub fn rebuild(graph: &TopicGraph, facts: &FactStore) -> Self {
    let mut index = Self::new();
    for fact in facts.iter() {
      index.insert(fact, graph, facts);
    }
    debug!(facts = index.len(), topics = index.topics.len(), "rebuilt search index");
    index
  }

  pub fn len(&self) -> usize { self.documents.len() }

  pub fn is_empty(&self) -> bool { self.documents.is_empty() }

  pub fn contains(&self, id: FactId) -> bool { self.documents.contains_key(&id) }

  /// Facts filed under `topic` or any of its descendants.
  pub fn under(&self, topic: TopicId) -> impl Iterator<Item = FactId> + '_ {
    self.topics.get(&topic).into_iter().flatten().copied()
  }

  /// Every value recorded for `key` with the number of facts carrying it,
  /// in value order.
  pub fn values_of(&self, key: &str) -> impl Iterator<Item = (&PayloadValue, usize)> + '_ {
    self
      .attributes
      .get(key)
      .into_iter()
      .flat_map(|values| values.iter().map(|(v, ids)| (v, ids.len())))
  }

  // ── Maintenance ───────────────────────────────────────────────────────────

  pub fn apply(&mut self, delta: IndexDelta, graph: &TopicGraph, facts: &FactStore) {
    match delta {
      IndexDelta::FactUpserted(id) => self.reindex(id, graph, facts),
      IndexDelta::FactRemoved(id) => self.remove(id),
      IndexDelta::HierarchyChanged(topic) => {
        // A deleted topic has no subgraph left; its former children report
        // their own changes.
        let Ok(subgraph) = graph.descendants(topic) else { return };
        let affected: BTreeSet<FactId> =
          subgraph.iter().flat_map(|t| facts.tagged_with(*t)).collect();
        trace!(topic_id = %topic, topics = subgraph.len(), facts = affected.len(), "re-expanding subgraph");
        for id in affected {
          self.reindex(id, graph, facts);
        }
      }
    }
  }

  pub fn apply_all(
    &mut self,
    deltas: impl IntoIterator<Item = IndexDelta>,
    graph: &TopicGraph,
    facts: &FactStore,
  ) {
    for delta in deltas {
      self.apply(delta, graph, facts);
    }
  }

  fn reindex(&mut self, id: FactId, graph: &TopicGraph, facts: &FactStore) {
    self.remove(id);
    if let Some(fact) = facts.get(id) {
      self.insert(fact, graph, facts);
    }
  }

  fn insert(&mut self, fact: &Fact, graph: &TopicGraph, facts: &FactStore) {
    let id = fact.fact_id;
    let mut topics = BTreeSet::new();
    for topic in &fact.topics {
      if let Ok(up) = graph.ancestors(*topic) {
        topics.extend(up);
      }
    }
    for topic in &topics {
      self.topics.entry(*topic).or_default().insert(id);
    }
    let attributes: Vec<(String, PayloadValue)> =
      fact.payload.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for (key, value) in &attributes {
      self
        .attributes
        .entry(key.clone())
        .or_default()
        .entry(value.clone())
        .or_default()
        .insert(id);
    }
    let period = facts.span_of(fact);
    if let Some(span) = period {
      self.periods.entry(span.start).or_default().insert(id);
    }
    self.chronology.insert((fact.created_at, id));
    self.documents.insert(id, Document { created_at: fact.created_at, topics, attributes, period });
  }

  fn remove(&mut self, id: FactId) {
    let Some(doc) = self.documents.remove(&id) else { return };
    for topic in &doc.topics {
      prune(&mut self.topics, topic, id);
    }
    for (key, value) in &doc.attributes {
      if let Some(values) = self.attributes.get_mut(key) {
        prune(values, value, id);
        if values.is_empty() {
          self.attributes.remove(key);
        }
      }
    }
    if let Some(period) = doc.period {
      prune(&mut self.periods, &period.start, id);
    }
    self.chronology.remove(&(doc.created_at, id));
  }

  // ── Queries ───────────────────────────────────────────────────────────────

  /// Answer a recall query. Topic selectors must name existing topics.
  pub fn query(&self, query: &Query, graph: &TopicGraph) -> Result<Hits<'_>> {
    let mut categories = Vec::new();

    if !query.topics.is_empty() {
      let mut sets = Vec::with_capacity(query.topics.len());
      for selector in &query.topics {
        let topic = selector.resolve(graph)?;
        sets.push(self.under(topic).collect());
      }
      categories.push(combine(query.mode, sets));
    }

    if !query.attributes.is_empty() {
      let sets = query
        .attributes
        .iter()
        .map(|filter| self.matching(filter))
        .collect::<Result<Vec<_>>>()?;
      categories.push(combine(query.mode, sets));
    }

    if let Some(range) = &query.dates {
      range.validate()?;
      categories.push(self.during(range));
    }

    Ok(Hits::new(self, intersect_all(categories)))
  }

  fn matching(&self, filter: &AttributeFilter) -> Result<BTreeSet<FactId>> {
    let Some(values) = self.attributes.get(filter.key()) else {
      return Ok(BTreeSet::new());
    };
    let ids = match filter {
      AttributeFilter::Exists(_) => values.values().flatten().copied().collect(),
      AttributeFilter::Equals(_, value) => values.get(value).cloned().unwrap_or_default(),
      AttributeFilter::Range { min, max, .. } => {
        let Some(sample) = min.as_ref().or(max.as_ref()) else {
          return Ok(values.values().flatten().copied().collect());
        };
        if let (Some(lo), Some(hi)) = (min, max) {
          if !lo.same_type(hi) {
            return Err(Error::invalid(format!(
              "range bounds must share a type, got {} and {}",
              lo.type_name(),
              hi.type_name()
            )));
          }
          if lo > hi {
            return Ok(BTreeSet::new());
          }
        }
        let lower = min.as_ref().map_or(Bound::Unbounded, Bound::Included);
        let upper = max.as_ref().map_or(Bound::Unbounded, Bound::Included);
        values
          .range::<PayloadValue, _>((lower, upper))
          .filter(|(value, _)| value.same_type(sample))
          .flat_map(|(_, ids)| ids.iter().copied())
          .collect()
      }
    };
    Ok(ids)
  }

  /// Facts whose period overlaps `range`.
  fn during(&self, range: &DateRange) -> BTreeSet<FactId> {
    let upper = range.end.map_or(Bound::Unbounded, |end| Bound::Included(Some(end)));
    self
      .periods
      .range::<Option<NaiveDate>, _>((Bound::Unbounded, upper))
      .flat_map(|(_, ids)| ids.iter().copied())
      .filter(|id| {
        self
          .documents
          .get(id)
          .and_then(|doc| doc.period)
          .is_some_and(|period| period.overlaps(range))
      })
      .collect()
  }

  pub(crate) fn chronological(&self) -> impl Iterator<Item = FactId> + '_ {
    self.chronology.iter().map(|(_, id)| *id)
  }

  pub(crate) fn in_creation_order(&self, ids: BTreeSet<FactId>) -> Vec<FactId> {
    let mut keyed: Vec<(DateTime<Utc>, FactId)> = ids
      .into_iter()
      .filter_map(|id| self.documents.get(&id).map(|doc| (doc.created_at, id)))
      .collect();
    keyed.sort_unstable();
    keyed.into_iter().map(|(_, id)| id).collect()
  }

  // ── Verification ──────────────────────────────────────────────────────────

  /// SHA-256 over a length-prefixed encoding of every posting.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"topics");
    for (topic, ids) in &self.topics {
      hasher.update(topic.0.as_bytes());
      hash_ids(&mut hasher, ids);
    }

    hasher.update(b"attributes");
    for (key, values) in &self.attributes {
      hash_str(&mut hasher, key);
      hasher.update((values.len() as u64).to_le_bytes());
      for (value, ids) in values {
        hash_value(&mut hasher, value);
        hash_ids(&mut hasher, ids);
      }
    }

    hasher.update(b"periods");
    for (start, ids) in &self.periods {
      hash_date(&mut hasher, *start);
      hash_ids(&mut hasher, ids);
    }

    hasher.update(b"chronology");
    for (created_at, id) in &self.chronology {
      hasher.update(created_at.timestamp_micros().to_le_bytes());
      hasher.update(id.0.as_bytes());
    }

    hex::encode(hasher.finalize())
  }

  /// Compare against a rebuild from `graph` and `facts`.
  pub fn verify(&self, graph: &TopicGraph, facts: &FactStore) -> Result<()> {
    let rebuilt = Self::rebuild(graph, facts);
    if *self != rebuilt {
      return Err(Error::IndexDiverged {
        incremental: self.digest(),
        rebuilt:     rebuilt.digest(),
      });
    }
    Ok(())
  }
}

fn prune<K: Ord>(map: &mut BTreeMap<K, BTreeSet<FactId>>, key: &K, id: FactId) {
  if let Some(set) = map.get_mut(key) {
    set.remove(&id);
    if set.is_empty() {
      map.remove(key);
    }
  }
}

fn hash_ids(hasher: &mut Sha256, ids: &BTreeSet<FactId>) {
  hasher.update((ids.len() as u64).to_le_bytes());
  for id in ids {
    hasher.update(id.0.as_bytes());
  }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
  hasher.update((s.len() as u64).to_le_bytes());
  hasher.update(s.as_bytes());
}

fn hash_date(hasher: &mut Sha256, date: Option<NaiveDate>) {
  match date {
    None => hasher.update([0]),
    Some(d) => {
      hasher.update([1]);
      hasher.update(d.num_days_from_ce().to_le_bytes());
    }
  }
}

fn hash_value(hasher: &mut Sha256, value: &PayloadValue) {
  match value {
    PayloadValue::Number(n) => {
      hasher.update([0]);
      hasher.update(n.to_bits().to_le_bytes());
    }
    PayloadValue::Date(d) => {
      hasher.update([1]);
      hasher.update(d.num_days_from_ce().to_le_bytes());
    }
    PayloadValue::Text(s) => {
      hasher.update([2]);
      hash_str(hasher, s);
    }
    PayloadValue::Topic(id) => {
      hasher.update([3]);
      hasher.update(id.0.as_bytes());
    }
  }
}
