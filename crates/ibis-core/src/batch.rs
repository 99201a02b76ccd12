//! Atomic merge and split of topics via [`BatchTagOperator`].
//!
//! A batch touches the topic graph, the fact store and the search index at
//! once. Every request is validated in full before anything changes, and the
//! graph and fact edits are worked out on staged copies that are swapped in
//! only once every invariant holds. Callers run the operator inside a
//! [`crate::Transaction`], so even an unexpected failure leaves the committed
//! snapshot untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
  error::{Error, Result},
  fact_store::FactStore,
  graph::TopicGraph,
  id::{FactId, TopicId},
  index::SearchIndex,
  policy::Policy,
  source::SourceRegistry,
  topic::{NewTopic, TopicKind},
};

// ─── Requests ────────────────────────────────────────────────────────────────

/// One topic to carve out of the topic being split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
  pub name:    String,
  /// Defaults to the original topic's kind.
  pub kind:    Option<TopicKind>,
  /// Defaults to the original topic's parents.
  pub parents: Option<BTreeSet<TopicId>>,
}

impl SplitPart {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), kind: None, parents: None }
  }

  pub fn with_kind(mut self, kind: TopicKind) -> Self {
    self.kind = Some(kind);
    self
  }

  pub fn with_parents(mut self, parents: impl IntoIterator<Item = TopicId>) -> Self {
    self.parents = Some(parents.into_iter().collect());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
  pub topic:                  TopicId,
  pub parts:                  Vec<SplitPart>,
  /// Fact → name of the part it moves to.
  pub assignment:             BTreeMap<FactId, String>,
  /// Drop the original topic from facts left unassigned, and so remove it.
  pub retire_original:        bool,
  /// Overrides [`Policy::require_full_partition`].
  pub require_full_partition: Option<bool>,
}

impl SplitRequest {
  pub fn new(topic: TopicId) -> Self {
    Self {
      topic,
      parts: Vec::new(),
      assignment: BTreeMap::new(),
      retire_original: false,
      require_full_partition: None,
    }
  }

  pub fn part(mut self, part: SplitPart) -> Self {
    self.parts.push(part);
    self
  }

  pub fn assign(mut self, fact: FactId, part: impl Into<String>) -> Self {
    self.assignment.insert(fact, part.into());
    self
  }

  pub fn retire_original(mut self) -> Self {
    self.retire_original = true;
    self
  }

  pub fn full_partition(mut self, required: bool) -> Self {
    self.require_full_partition = Some(required);
    self
  }
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
  #[default]
  Pending,
  Validated,
  Applying,
  Committed,
  Rejected,
}

/// What a committed batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub state:    BatchState,
  /// New topics, in request order.
  pub created:  Vec<TopicId>,
  pub removed:  Vec<TopicId>,
  pub retagged: BTreeSet<FactId>,
}

// ─── Operator ────────────────────────────────────────────────────────────────

/// Runs a single merge or split against handles to the components it
/// coordinates. An operator is spent once it reaches `Committed` or
/// `Rejected`.
pub struct BatchTagOperator<'a> {
  graph:   &'a mut TopicGraph,
  sources: &'a SourceRegistry,
  facts:   &'a mut FactStore,
  index:   &'a mut SearchIndex,
  policy:  Policy,
  state:   BatchState,
}

impl<'a> BatchTagOperator<'a> {
  pub fn new(
    graph: &'a mut TopicGraph,
    sources: &'a SourceRegistry,
    facts: &'a mut FactStore,
    index: &'a mut SearchIndex,
    policy: Policy,
  ) -> Self {
    Self { graph, sources, facts, index, policy, state: BatchState::Pending }
  }

  pub fn state(&self) -> BatchState { self.state }

  /// Fold `sources` into `target`. Every fact tagged with, using as context,
  /// or referring to a source topic is moved to `target`; the sources are
  /// deleted. An empty source set is a no-op.
  pub fn merge(&mut self, sources: &BTreeSet<TopicId>, target: TopicId) -> Result<BatchReport> {
    self.start()?;
    let outcome = self.try_merge(sources, target);
    self.finish("merge", outcome)
  }

  /// Split a topic into new sibling topics, moving the assigned facts.
  pub fn split(&mut self, request: &SplitRequest) -> Result<BatchReport> {
    self.start()?;
    let outcome = self.try_split(request);
    self.finish("split", outcome)
  }

  fn try_merge(&mut self, sources: &BTreeSet<TopicId>, target: TopicId) -> Result<BatchReport> {
    self.graph.topic(target)?;
    for source in sources {
      self.graph.topic(*source)?;
    }
    if sources.contains(&target) {
      return Err(Error::invalid(format!("merge target {target} is also a source")));
    }
    self.state = BatchState::Validated;
    if sources.is_empty() {
      return Ok(BatchReport::default());
    }

    let mut staged = self.graph.clone();
    staged.merge_into(sources, target)?;

    self.state = BatchState::Applying;
    let mut facts = self.facts.clone();
    let mut retagged = BTreeSet::new();
    for source in sources {
      for fact in facts.referencing(*source) {
        facts.retag(fact, *source, target)?;
        retagged.insert(fact);
      }
    }
    self.check_retagged(&facts, &retagged)?;
    *self.graph = staged;
    *self.facts = facts;
    self.sync();

    Ok(BatchReport {
      state: BatchState::Committed,
      created: Vec::new(),
      removed: sources.iter().copied().collect(),
      retagged,
    })
  }

  fn try_split(&mut self, request: &SplitRequest) -> Result<BatchReport> {
    let topic = request.topic;
    let original = self.graph.topic(topic)?.clone();
    if request.parts.is_empty() {
      return Err(Error::invalid("a split needs at least one part"));
    }
    let part_names: BTreeSet<&str> = request.parts.iter().map(|p| p.name.trim()).collect();
    for (fact, part) in &request.assignment {
      if !self.facts.fact(*fact)?.has_topic(topic) {
        return Err(Error::invalid(format!("fact {fact} is not tagged with {}", original.name)));
      }
      if !part_names.contains(part.trim()) {
        return Err(Error::invalid(format!("{part:?} is not one of the split parts")));
      }
    }

    let unassigned: Vec<FactId> = self
      .facts
      .tagged_with(topic)
      .filter(|f| !request.assignment.contains_key(f))
      .collect();
    let full_partition =
      request.require_full_partition.unwrap_or(self.policy.require_full_partition);
    if full_partition && let Some(fact_id) = unassigned.first() {
      return Err(Error::UnassignedFact { topic_id: topic, fact_id: *fact_id });
    }
    if request.retire_original {
      for fact_id in &unassigned {
        let fact = self.facts.fact(*fact_id)?;
        if fact.topics.len() == 1 {
          return Err(Error::LastTopic(*fact_id));
        }
      }
      let mentioning = self
        .facts
        .mentioning(topic)
        .filter(|f| !request.assignment.contains_key(f))
        .count();
      if mentioning > 0 {
        return Err(Error::TopicReferenced { topic_id: topic, facts: mentioning });
      }
    }

    self.state = BatchState::Validated;

    // Names and parents are checked as the parts are created.
    let mut staged = self.graph.clone();
    let mut created = Vec::with_capacity(request.parts.len());
    let mut by_name = BTreeMap::new();
    for part in &request.parts {
      let parents = part.parents.clone().unwrap_or_else(|| original.parents.clone());
      if request.retire_original && parents.contains(&topic) {
        return Err(Error::invalid(format!(
          "part {:?} cannot sit under {}, which is being retired",
          part.name, original.name
        )));
      }
      let kind = part.kind.clone().unwrap_or_else(|| original.kind.clone());
      let mut input = NewTopic::new(part.name.trim(), kind).with_parents(parents);
      input.schema = original.schema.clone();
      let id = staged.create(input)?;
      created.push(id);
      by_name.insert(part.name.trim().to_owned(), id);
    }

    self.state = BatchState::Applying;
    let mut facts = self.facts.clone();
    let mut retagged = BTreeSet::new();
    for (fact, part) in &request.assignment {
      let Some(new_topic) = by_name.get(part.trim()) else { continue };
      facts.retag(*fact, topic, *new_topic)?;
      retagged.insert(*fact);
    }
    if request.retire_original {
      for fact in unassigned {
        facts.remove_topic(fact, topic)?;
        retagged.insert(fact);
      }
    }
    self.check_retagged(&facts, &retagged)?;

    let mut removed = Vec::new();
    if facts.referencing(topic).is_empty() {
      staged.remove_and_reparent(topic)?;
      removed.push(topic);
    }
    *self.graph = staged;
    *self.facts = facts;
    self.sync();

    Ok(BatchReport { state: BatchState::Committed, created, removed, retagged })
  }

  fn start(&self) -> Result<()> {
    if self.state != BatchState::Pending {
      return Err(Error::invalid("this batch has already run"));
    }
    Ok(())
  }

  /// Re-check the fact invariants on every fact the batch touched.
  fn check_retagged(&self, facts: &FactStore, retagged: &BTreeSet<FactId>) -> Result<()> {
    for id in retagged {
      let fact = facts.fact(*id)?;
      if fact.topics.is_empty() {
        return Err(Error::LastTopic(*id));
      }
      if fact.sources.is_empty() {
        return Err(Error::LastSource(*id));
      }
      for source in &fact.sources {
        self.sources.source(*source)?;
      }
    }
    Ok(())
  }

  fn sync(&mut self) {
    let deltas: Vec<_> = self
      .graph
      .take_deltas()
      .into_iter()
      .chain(self.facts.take_deltas())
      .collect();
    self.index.apply_all(deltas, self.graph, self.facts);
  }

  fn finish(&mut self, op: &str, outcome: Result<BatchReport>) -> Result<BatchReport> {
    match outcome {
      Ok(report) => {
        self.state = BatchState::Committed;
        info!(
          op,
          created = report.created.len(),
          removed = report.removed.len(),
          retagged = report.retagged.len(),
          "batch committed"
        );
        Ok(BatchReport { state: self.state, ..report })
      }
      Err(err) => {
        self.state = BatchState::Rejected;
        warn!(op, error = %err, "batch rejected");
        Err(err)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    fact::{NewFact, PayloadValue},
    query::Query,
    source::{NewSource, SourceKind},
  };

  struct World {
    graph:   TopicGraph,
    sources: SourceRegistry,
    facts:   FactStore,
    index:   SearchIndex,
  }

  impl World {
    fn new() -> Self {
      Self {
        graph:   TopicGraph::new(),
        sources: SourceRegistry::new(),
        facts:   FactStore::new(),
        index:   SearchIndex::new(),
      }
    }

    fn topic(&mut self, name: &str, parents: &[TopicId]) -> TopicId {
      self
        .graph
        .create(NewTopic::new(name, TopicKind::Generic).with_parents(parents.iter().copied()))
        .unwrap()
    }

    fn fact(&mut self, statement: &str, topics: &[TopicId]) -> FactId {
      let first = self.sources.iter().next().map(|s| s.source_id);
      let book = match first {
        Some(id) => id,
        None => self.sources.create(NewSource::new("Notes", SourceKind::Other)).unwrap(),
      };
      let id = self
        .facts
        .record(
          NewFact::new(statement).with_topics(topics.iter().copied()).with_source(book),
          &self.graph,
          &self.sources,
        )
        .unwrap();
      self.sync();
      id
    }

    fn sync(&mut self) {
      let deltas: Vec<_> =
        self.graph.take_deltas().into_iter().chain(self.facts.take_deltas()).collect();
      self.index.apply_all(deltas, &self.graph, &self.facts);
    }

    fn operator(&mut self, policy: Policy) -> BatchTagOperator<'_> {
      BatchTagOperator::new(
        &mut self.graph,
        &self.sources,
        &mut self.facts,
        &mut self.index,
        policy,
      )
    }

    fn under(&self, topic: TopicId) -> BTreeSet<FactId> {
      self.index.query(&Query::new().topic(topic), &self.graph).unwrap().to_set()
    }
  }

  #[test]
  fn merge_moves_facts_and_removes_sources() {
    let mut w = World::new();
    let a = w.topic("A", &[]);
    let b = w.topic("B", &[]);
    let c = w.topic("C", &[]);
    let fa = w.fact("fa", &[a]);
    let fb = w.fact("fb", &[b]);
    let fab = w.fact("fab", &[a, b]);
    let fc = w.fact("fc", &[c]);

    let mut expected = w.under(a);
    expected.extend(w.under(b));
    expected.extend(w.under(c));

    let report = w.operator(Policy::default()).merge(&BTreeSet::from([a, b]), c).unwrap();
    assert_eq!(report.state, BatchState::Committed);
    assert_eq!(report.retagged, BTreeSet::from([fa, fb, fab]));

    assert_eq!(w.under(c), expected);
    assert!(w.under(c).contains(&fc));
    assert!(!w.graph.contains(a) && !w.graph.contains(b));
    assert_eq!(w.facts.fact(fab).unwrap().topics, BTreeSet::from([c]));
    assert!(w.index.verify(&w.graph, &w.facts).is_ok());
  }

  #[test]
  fn merge_rejects_target_among_sources() {
    let mut w = World::new();
    let a = w.topic("A", &[]);
    let mut op = w.operator(Policy::default());
    assert!(matches!(op.merge(&BTreeSet::from([a]), a), Err(Error::Validation(_))));
  }

  #[test]
  fn cyclic_merge_changes_nothing() {
    let mut w = World::new();
    let europe = w.topic("Europe", &[]);
    let france = w.topic("France", &[europe]);
    let paris = w.topic("Paris", &[france]);
    let f = w.fact("x", &[europe]);

    let mut op = w.operator(Policy::default());
    let err = op.merge(&BTreeSet::from([europe]), paris).unwrap_err();
    assert!(matches!(err, Error::Cycle { .. }));
    assert_eq!(op.state(), BatchState::Rejected);

    assert!(w.graph.contains(europe));
    assert_eq!(w.facts.fact(f).unwrap().topics, BTreeSet::from([europe]));
    assert_eq!(w.under(europe), BTreeSet::from([f]));
  }

  #[test]
  fn merge_moves_payload_references() {
    let mut w = World::new();
    let a = w.topic("A", &[]);
    let c = w.topic("C", &[]);
    let other = w.topic("Other", &[]);
    let f = w.fact("x", &[other]);
    w.facts.set_payload(f, "about", PayloadValue::Topic(a), &w.graph).unwrap();
    w.sync();

    w.operator(Policy::default()).merge(&BTreeSet::from([a]), c).unwrap();
    assert_eq!(w.facts.fact(f).unwrap().payload["about"], PayloadValue::Topic(c));
  }

  #[test]
  fn partial_split_keeps_the_original() {
    let mut w = World::new();
    let europe = w.topic("Europe", &[]);
    let paris = w.topic("Paris", &[europe]);
    let city = w.fact("city", &[paris]);
    let myth = w.fact("myth", &[paris]);

    let request = SplitRequest::new(paris)
      .part(SplitPart::new("Paris (city)"))
      .assign(city, "Paris (city)");
    let report = w.operator(Policy::default()).split(&request).unwrap();

    let new_topic = report.created[0];
    assert!(report.removed.is_empty());
    assert_eq!(w.graph.topic(new_topic).unwrap().parents, BTreeSet::from([europe]));
    assert_eq!(w.under(new_topic), BTreeSet::from([city]));
    assert_eq!(w.under(paris), BTreeSet::from([myth]));
    assert_eq!(w.under(europe), BTreeSet::from([city, myth]));
    assert!(w.index.verify(&w.graph, &w.facts).is_ok());
  }

  #[test]
  fn full_split_removes_the_original() {
    let mut w = World::new();
    let europe = w.topic("Europe", &[]);
    let paris = w.topic("Paris", &[europe]);
    let left = w.topic("Left Bank", &[paris]);
    let city = w.fact("city", &[paris]);
    let myth = w.fact("myth", &[paris]);

    let request = SplitRequest::new(paris)
      .part(SplitPart::new("Paris (city)"))
      .part(SplitPart::new("Paris (myth)"))
      .assign(city, "Paris (city)")
      .assign(myth, "Paris (myth)");
    let report = w.operator(Policy::default()).split(&request).unwrap();

    assert_eq!(report.created.len(), 2);
    assert_eq!(report.removed, vec![paris]);
    assert!(!w.graph.contains(paris));
    assert_eq!(w.graph.topic(left).unwrap().parents, BTreeSet::from([europe]));
    assert!(w.index.verify(&w.graph, &w.facts).is_ok());
  }

  #[test]
  fn full_partition_rejects_unassigned_facts() {
    let mut w = World::new();
    let paris = w.topic("Paris", &[]);
    let city = w.fact("city", &[paris]);
    let myth = w.fact("myth", &[paris]);

    let request = SplitRequest::new(paris)
      .part(SplitPart::new("Paris (city)"))
      .assign(city, "Paris (city)")
      .full_partition(true);
    let mut op = w.operator(Policy::default());
    let err = op.split(&request).unwrap_err();
    assert!(matches!(err, Error::UnassignedFact { fact_id, .. } if fact_id == myth));
    assert_eq!(op.state(), BatchState::Rejected);
    assert!(w.graph.resolve(&TopicKind::Generic, "Paris (city)").is_none());
    assert_eq!(w.facts.fact(city).unwrap().topics, BTreeSet::from([paris]));
  }

  #[test]
  fn retiring_drops_the_original_from_unassigned_facts() {
    let mut w = World::new();
    let paris = w.topic("Paris", &[]);
    let france = w.topic("France", &[]);
    let city = w.fact("city", &[paris]);
    let both = w.fact("both", &[paris, france]);

    let request = SplitRequest::new(paris)
      .part(SplitPart::new("Paris (city)"))
      .assign(city, "Paris (city)")
      .retire_original();
    let report = w.operator(Policy::default()).split(&request).unwrap();

    assert_eq!(report.removed, vec![paris]);
    assert_eq!(w.facts.fact(both).unwrap().topics, BTreeSet::from([france]));
  }

  #[test]
  fn retiring_refuses_to_strand_a_fact() {
    let mut w = World::new();
    let paris = w.topic("Paris", &[]);
    let lonely = w.fact("lonely", &[paris]);

    let request = SplitRequest::new(paris).part(SplitPart::new("Paris (city)")).retire_original();
    let err = w.operator(Policy::default()).split(&request).unwrap_err();
    assert!(matches!(err, Error::LastTopic(id) if id == lonely));
    assert!(w.graph.contains(paris));
  }

  #[test]
  fn duplicate_part_names_are_rejected() {
    let mut w = World::new();
    let paris = w.topic("Paris", &[]);
    w.topic("Taken", &[]);
    let request = SplitRequest::new(paris).part(SplitPart::new("Taken"));
    let err = w.operator(Policy::default()).split(&request).unwrap_err();
    assert!(matches!(err, Error::DuplicateName { .. }));
    assert_eq!(w.graph.len(), 2);
  }

  #[test]
  fn operators_run_once() {
    let mut w = World::new();
    let a = w.topic("A", &[]);
    let c = w.topic("C", &[]);
    let mut op = w.operator(Policy::default());
    op.merge(&BTreeSet::new(), c).unwrap();
    assert!(op.merge(&BTreeSet::from([a]), c).is_err());
  }
}
