//! Owns every fact and the reverse links used for referential checks.
//!
//! Each successful mutation stamps the fact's modification time and queues an
//! [`IndexDelta`] for the search index. The store also owns the shared
//! periods facts point at, since moving a period changes how its facts are
//! indexed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::debug;

use crate::{
  error::{Error, Result},
  fact::{Fact, NewFact, PayloadValue},
  graph::TopicGraph,
  id::{FactId, PeriodId, SourceId, TopicId},
  index::{IndexDelta, SearchIndex},
  period::{DateRange, Period, PeriodRegistry},
  query::{Hits, MatchMode, Query},
  source::SourceRegistry,
};

#[derive(Debug, Clone, Default)]
pub struct FactStore {
  facts:     BTreeMap<FactId, Fact>,
  /// Topic → facts tagged with it.
  tagged:    BTreeMap<TopicId, BTreeSet<FactId>>,
  /// Source → facts citing it.
  cited:     BTreeMap<SourceId, BTreeSet<FactId>>,
  /// Topic → facts whose payload refers to it.
  mentions:  BTreeMap<TopicId, BTreeSet<FactId>>,
  /// Fact → facts restating it.
  restated:  BTreeMap<FactId, BTreeSet<FactId>>,
  periods:   PeriodRegistry,
  /// Period → facts taking place in it.
  scheduled: BTreeMap<PeriodId, BTreeSet<FactId>>,
  deltas:    Vec<IndexDelta>,
}

impl FactStore {
  pub fn new() -> Self { Self::default() }

  /// Load stored facts and periods, checking every reference against
  /// `graph` and `sources`. Timestamps are kept as stored.
  pub fn from_records(
    records: impl IntoIterator<Item = Fact>,
    periods: impl IntoIterator<Item = Period>,
    graph: &TopicGraph,
    sources: &SourceRegistry,
  ) -> Result<Self> {
    let mut store = Self { periods: PeriodRegistry::from_records(periods)?, ..Self::new() };
    for fact in records {
      if store.facts.contains_key(&fact.fact_id) {
        return Err(Error::invalid(format!("duplicate fact id {}", fact.fact_id)));
      }
      check_links(&fact.topics, &fact.sources, graph, sources)?;
      if let Some(context) = fact.context
        && !fact.topics.contains(&context)
      {
        return Err(Error::invalid(format!(
          "fact {} uses {context} as context without being tagged with it",
          fact.fact_id
        )));
      }
      check_payload(&fact.payload, fact.context, graph)?;
      for value in fact.payload.values() {
        value.clone().validated(graph)?;
      }
      if let Some(period) = fact.period {
        store.periods.period(period)?;
      }
      store.link(&fact);
      store.facts.insert(fact.fact_id, fact);
    }
    store.check_restatements()?;
    Ok(store)
  }

  /// Every restatement points at an existing fact recorded no later than
  /// the restating one, and no chain of restatements loops.
  fn check_restatements(&self) -> Result<()> {
    for fact in self.facts.values() {
      let Some(earlier) = fact.restated_from else { continue };
      if self.fact(earlier)?.created_at > fact.created_at {
        return Err(Error::invalid(format!(
          "fact {} restates {earlier}, which was recorded after it",
          fact.fact_id
        )));
      }
    }
    for fact in self.facts.values() {
      let mut seen = BTreeSet::from([fact.fact_id]);
      let mut next = fact.restated_from;
      while let Some(id) = next {
        if !seen.insert(id) {
          return Err(Error::invalid(format!("restatements of fact {} loop", fact.fact_id)));
        }
        next = self.facts.get(&id).and_then(|f| f.restated_from);
      }
    }
    Ok(())
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub fn get(&self, id: FactId) -> Option<&Fact> { self.facts.get(&id) }

  pub fn fact(&self, id: FactId) -> Result<&Fact> {
    self.facts.get(&id).ok_or(Error::FactNotFound(id))
  }

  pub fn contains(&self, id: FactId) -> bool { self.facts.contains_key(&id) }

  pub fn len(&self) -> usize { self.facts.len() }

  pub fn is_empty(&self) -> bool { self.facts.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Fact> { self.facts.values() }

  /// Facts tagged directly with `topic` (no hierarchy expansion).
  pub fn tagged_with(&self, topic: TopicId) -> impl Iterator<Item = FactId> + '_ {
    self.tagged.get(&topic).into_iter().flatten().copied()
  }

  pub fn citing(&self, source: SourceId) -> impl Iterator<Item = FactId> + '_ {
    self.cited.get(&source).into_iter().flatten().copied()
  }

  /// Facts whose payload refers to `topic`.
  pub fn mentioning(&self, topic: TopicId) -> impl Iterator<Item = FactId> + '_ {
    self.mentions.get(&topic).into_iter().flatten().copied()
  }

  pub fn restatements(&self, fact: FactId) -> impl Iterator<Item = FactId> + '_ {
    self.restated.get(&fact).into_iter().flatten().copied()
  }

  pub fn periods(&self) -> &PeriodRegistry { &self.periods }

  /// Facts taking place in `period`.
  pub fn scheduled_in(&self, period: PeriodId) -> impl Iterator<Item = FactId> + '_ {
    self.scheduled.get(&period).into_iter().flatten().copied()
  }

  /// The date range of the period `fact` points at.
  pub fn span_of(&self, fact: &Fact) -> Option<DateRange> {
    fact.period.and_then(|id| self.periods.get(id)).map(|p| p.span)
  }

  /// Facts that would dangle if `topic` disappeared: tagged with it (which
  /// covers context use) or mentioning it.
  pub fn referencing(&self, topic: TopicId) -> BTreeSet<FactId> {
    self.tagged_with(topic).chain(self.mentioning(topic)).collect()
  }

  /// Facts filed under `topics` or their descendants. Answered from the index.
  pub fn query_by_topics<'a>(
    &self,
    topics: impl IntoIterator<Item = TopicId>,
    mode: MatchMode,
    graph: &TopicGraph,
    index: &'a SearchIndex,
  ) -> Result<Hits<'a>> {
    let query = topics
      .into_iter()
      .fold(Query::new().mode(mode), |q, topic| q.topic(topic));
    index.query(&query, graph)
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  pub fn record(
    &mut self,
    input: NewFact,
    graph: &TopicGraph,
    sources: &SourceRegistry,
  ) -> Result<FactId> {
    let statement = input.statement.trim();
    if statement.is_empty() {
      return Err(Error::invalid("facts need a statement"));
    }
    let mut topics = input.topics;
    topics.extend(input.context);
    if topics.is_empty() {
      return Err(Error::invalid("facts need at least one topic"));
    }
    if input.sources.is_empty() {
      return Err(Error::invalid("facts need at least one source"));
    }
    check_links(&topics, &input.sources, graph, sources)?;
    let payload = clean_payload(input.payload, graph)?;
    check_payload(&payload, input.context, graph)?;
    if let Some(period) = input.period {
      self.periods.period(period)?;
    }
    let mut now = Utc::now();
    if let Some(earlier) = input.restated_from {
      now = now.max(self.fact(earlier)?.created_at);
    }

    let fact = Fact {
      fact_id: FactId::new(),
      statement: statement.to_owned(),
      payload,
      context: input.context,
      period: input.period,
      topics,
      sources: input.sources,
      restated_from: input.restated_from,
      created_at: now,
      modified_at: now,
    };
    let fact_id = fact.fact_id;
    debug!(%fact_id, topics = fact.topics.len(), sources = fact.sources.len(), "recorded fact");
    self.link(&fact);
    self.facts.insert(fact_id, fact);
    self.deltas.push(IndexDelta::FactUpserted(fact_id));
    Ok(fact_id)
  }

  /// Tag a fact. Returns whether the tag is new.
  pub fn add_topic(&mut self, id: FactId, topic: TopicId, graph: &TopicGraph) -> Result<bool> {
    graph.topic(topic)?;
    if self.fact(id)?.has_topic(topic) {
      return Ok(false);
    }
    self.modify(id, |fact| {
      fact.topics.insert(topic);
      Ok(())
    })?;
    Ok(true)
  }

  /// Untag a fact; a fact whose context was `topic` loses its context.
  pub fn remove_topic(&mut self, id: FactId, topic: TopicId) -> Result<bool> {
    let fact = self.fact(id)?;
    if !fact.has_topic(topic) {
      return Ok(false);
    }
    if fact.topics.len() == 1 {
      return Err(Error::LastTopic(id));
    }
    self.modify(id, |fact| {
      fact.topics.remove(&topic);
      if fact.context == Some(topic) {
        fact.context = None;
      }
      Ok(())
    })?;
    Ok(true)
  }

  pub fn add_source(
    &mut self,
    id: FactId,
    source: SourceId,
    sources: &SourceRegistry,
  ) -> Result<bool> {
    sources.source(source)?;
    if self.fact(id)?.cites(source) {
      return Ok(false);
    }
    self.modify(id, |fact| {
      fact.sources.insert(source);
      Ok(())
    })?;
    Ok(true)
  }

  pub fn remove_source(&mut self, id: FactId, source: SourceId) -> Result<bool> {
    let fact = self.fact(id)?;
    if !fact.cites(source) {
      return Ok(false);
    }
    if fact.sources.len() == 1 {
      return Err(Error::LastSource(id));
    }
    self.modify(id, |fact| {
      fact.sources.remove(&source);
      Ok(())
    })?;
    Ok(true)
  }

  /// Set one payload attribute, returning the value it replaces.
  pub fn set_payload(
    &mut self,
    id: FactId,
    key: &str,
    value: PayloadValue,
    graph: &TopicGraph,
  ) -> Result<Option<PayloadValue>> {
    let key = clean_key(key)?;
    let value = value.validated(graph)?;
    let context = self.fact(id)?.context;
    check_key(&key, context, graph)?;
    let mut previous = None;
    self.modify(id, |fact| {
      previous = fact.payload.insert(key, value);
      Ok(())
    })?;
    Ok(previous)
  }

  pub fn remove_payload(&mut self, id: FactId, key: &str) -> Result<Option<PayloadValue>> {
    if !self.fact(id)?.payload.contains_key(key.trim()) {
      return Ok(None);
    }
    let mut previous = None;
    self.modify(id, |fact| {
      previous = fact.payload.remove(key.trim());
      Ok(())
    })?;
    Ok(previous)
  }

  /// Set or clear the fact's context. A new context is also added to the
  /// fact's topics and must declare every payload key already present.
  pub fn set_context(
    &mut self,
    id: FactId,
    context: Option<TopicId>,
    graph: &TopicGraph,
  ) -> Result<()> {
    if let Some(topic) = context {
      graph.topic(topic)?;
      check_payload(&self.fact(id)?.payload, Some(topic), graph)?;
    }
    self.modify(id, |fact| {
      fact.context = context;
      fact.topics.extend(context);
      Ok(())
    })
  }

  /// Place a fact in a shared period, or take it out of its period.
  pub fn set_period(&mut self, id: FactId, period: Option<PeriodId>) -> Result<()> {
    if let Some(period) = period {
      self.periods.period(period)?;
    }
    self.modify(id, |fact| {
      fact.period = period;
      Ok(())
    })
  }

  pub fn create_period(&mut self, span: DateRange) -> Result<PeriodId> {
    self.periods.create(span)
  }

  /// Move a period. Every fact in it is re-indexed; the facts themselves are
  /// unchanged, so their modification times stay put.
  pub fn update_period(&mut self, id: PeriodId, span: DateRange) -> Result<()> {
    if self.periods.update(id, span)? == span {
      return Ok(());
    }
    let moved: Vec<FactId> = self.scheduled_in(id).collect();
    debug!(period_id = %id, facts = moved.len(), "moved period");
    self
      .deltas
      .extend(moved.into_iter().map(IndexDelta::FactUpserted));
    Ok(())
  }

  /// Delete a period. Facts in it are left without one.
  pub fn delete_period(&mut self, id: PeriodId) -> Result<Period> {
    self.periods.period(id)?;
    let users: Vec<FactId> = self.scheduled_in(id).collect();
    for fact in users {
      self.modify(fact, |f| {
        f.period = None;
        Ok(())
      })?;
    }
    self.scheduled.remove(&id);
    debug!(period_id = %id, "deleted period");
    self.periods.remove(id)
  }

  pub fn edit_statement(&mut self, id: FactId, statement: &str) -> Result<()> {
    let statement = statement.trim();
    if statement.is_empty() {
      return Err(Error::invalid("facts need a statement"));
    }
    self.modify(id, |fact| {
      fact.statement = statement.to_owned();
      Ok(())
    })
  }

  /// Delete a fact. Facts restating it keep their content but lose the link.
  pub fn delete(&mut self, id: FactId) -> Result<Fact> {
    let fact = self.facts.remove(&id).ok_or(Error::FactNotFound(id))?;
    self.unlink(&fact);
    let restatements: Vec<FactId> = self.restatements(id).collect();
    for later in restatements {
      self.modify(later, |f| {
        f.restated_from = None;
        Ok(())
      })?;
    }
    self.restated.remove(&id);
    debug!(fact_id = %id, "deleted fact");
    self.deltas.push(IndexDelta::FactRemoved(id));
    Ok(fact)
  }

  /// Move every reference to `from` on fact `id` over to `to`: the tag, the
  /// context and payload topic values. Used by batch operations, which check
  /// `to` exists beforehand.
  pub(crate) fn retag(&mut self, id: FactId, from: TopicId, to: TopicId) -> Result<()> {
    self.modify(id, |fact| {
      if fact.topics.remove(&from) {
        fact.topics.insert(to);
      }
      if fact.context == Some(from) {
        fact.context = Some(to);
      }
      for value in fact.payload.values_mut() {
        if value.as_topic() == Some(from) {
          *value = PayloadValue::Topic(to);
        }
      }
      Ok(())
    })
  }

  pub(crate) fn has_deltas(&self) -> bool { !self.deltas.is_empty() }

  pub(crate) fn take_deltas(&mut self) -> Vec<IndexDelta> {
    std::mem::take(&mut self.deltas)
  }

  // ── Internals ─────────────────────────────────────────────────────────────

  /// Apply `edit` to a copy of the fact and swap it in only if it succeeds.
  fn modify(&mut self, id: FactId, edit: impl FnOnce(&mut Fact) -> Result<()>) -> Result<()> {
    let mut fact = self.fact(id)?.clone();
    edit(&mut fact)?;
    fact.modified_at = Utc::now().max(fact.modified_at);
    if let Some(old) = self.facts.remove(&id) {
      self.unlink(&old);
    }
    self.link(&fact);
    self.facts.insert(id, fact);
    self.deltas.push(IndexDelta::FactUpserted(id));
    Ok(())
  }

  fn link(&mut self, fact: &Fact) {
    let id = fact.fact_id;
    for topic in &fact.topics {
      self.tagged.entry(*topic).or_default().insert(id);
    }
    for source in &fact.sources {
      self.cited.entry(*source).or_default().insert(id);
    }
    for topic in fact.mentions() {
      self.mentions.entry(topic).or_default().insert(id);
    }
    if let Some(earlier) = fact.restated_from {
      self.restated.entry(earlier).or_default().insert(id);
    }
    if let Some(period) = fact.period {
      self.scheduled.entry(period).or_default().insert(id);
    }
  }

  fn unlink(&mut self, fact: &Fact) {
    let id = fact.fact_id;
    for topic in &fact.topics {
      forget(&mut self.tagged, topic, id);
    }
    for source in &fact.sources {
      forget(&mut self.cited, source, id);
    }
    for topic in fact.mentions() {
      forget(&mut self.mentions, &topic, id);
    }
    if let Some(earlier) = fact.restated_from {
      forget(&mut self.restated, &earlier, id);
    }
    if let Some(period) = fact.period {
      forget(&mut self.scheduled, &period, id);
    }
  }
}

/// Remove `id` from the set under `key`, dropping the set once empty.
fn forget<K: Ord>(map: &mut BTreeMap<K, BTreeSet<FactId>>, key: &K, id: FactId) {
  if let Some(set) = map.get_mut(key) {
    set.remove(&id);
    if set.is_empty() {
      map.remove(key);
    }
  }
}

fn check_links(
  topics: &BTreeSet<TopicId>,
  source_ids: &BTreeSet<SourceId>,
  graph: &TopicGraph,
  sources: &SourceRegistry,
) -> Result<()> {
  if topics.is_empty() {
    return Err(Error::invalid("facts need at least one topic"));
  }
  if source_ids.is_empty() {
    return Err(Error::invalid("facts need at least one source"));
  }
  for topic in topics {
    graph.topic(*topic)?;
  }
  for source in source_ids {
    sources.source(*source)?;
  }
  Ok(())
}

fn clean_key(key: &str) -> Result<String> {
  let key = key.trim();
  if key.is_empty() {
    return Err(Error::invalid("attribute keys must not be empty"));
  }
  Ok(key.to_owned())
}

fn clean_payload(
  payload: BTreeMap<String, PayloadValue>,
  graph: &TopicGraph,
) -> Result<BTreeMap<String, PayloadValue>> {
  let mut out = BTreeMap::new();
  for (key, value) in payload {
    let key = clean_key(&key)?;
    if out.insert(key.clone(), value.validated(graph)?).is_some() {
      return Err(Error::invalid(format!("attribute {key:?} given twice")));
    }
  }
  Ok(out)
}

/// The context topic, when it declares a schema, must declare `key`.
fn check_key(key: &str, context: Option<TopicId>, graph: &TopicGraph) -> Result<()> {
  let Some(context) = context else { return Ok(()) };
  let topic = graph.topic(context)?;
  if !topic.declares(key) {
    return Err(Error::invalid(format!(
      "attribute {key:?} is not declared by {} ({})",
      topic.name, topic.kind
    )));
  }
  Ok(())
}

fn check_payload(
  payload: &BTreeMap<String, PayloadValue>,
  context: Option<TopicId>,
  graph: &TopicGraph,
) -> Result<()> {
  payload.keys().try_for_each(|key| check_key(key, context, graph))
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::{
    source::{NewSource, SourceKind},
    topic::{NewTopic, TopicKind},
  };

  struct Fixture {
    graph:   TopicGraph,
    sources: SourceRegistry,
    facts:   FactStore,
    rome:    TopicId,
    empire:  TopicId,
    book:    SourceId,
  }

  fn fixture() -> Fixture {
    let mut graph = TopicGraph::new();
    let empire = graph.create(NewTopic::new("Roman Empire", TopicKind::Generic)).unwrap();
    let rome = graph
      .create(
        NewTopic::new("Rome", TopicKind::Place)
          .with_parent(empire)
          .with_schema_key("population"),
      )
      .unwrap();
    let mut sources = SourceRegistry::new();
    let book = sources.create(NewSource::new("SPQR", SourceKind::Book)).unwrap();
    Fixture { graph, sources, facts: FactStore::new(), rome, empire, book }
  }

  #[test]
  fn record_requires_topics_and_sources() {
    let mut f = fixture();
    let no_topic = NewFact::new("Rome was founded").with_source(f.book);
    assert!(matches!(
      f.facts.record(no_topic, &f.graph, &f.sources),
      Err(Error::Validation(_))
    ));

    let no_source = NewFact::new("Rome was founded").with_topic(f.rome);
    assert!(matches!(
      f.facts.record(no_source, &f.graph, &f.sources),
      Err(Error::Validation(_))
    ));

    let unknown = NewFact::new("Rome was founded")
      .with_topic(TopicId::new())
      .with_source(f.book);
    assert!(f.facts.record(unknown, &f.graph, &f.sources).unwrap_err().is_not_found());
    assert!(f.facts.is_empty());
  }

  #[test]
  fn context_joins_topics_and_checks_schema() {
    let mut f = fixture();
    let id = f
      .facts
      .record(
        NewFact::new("Census of 14 AD")
          .with_context(f.rome)
          .with_attribute("population", PayloadValue::Number(4_937_000.0))
          .with_source(f.book),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    assert!(f.facts.fact(id).unwrap().has_topic(f.rome));

    let err = f
      .facts
      .set_payload(id, "area", PayloadValue::Number(1.0), &f.graph)
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(
      f.facts.fact(id).unwrap().describe(&f.graph),
      "Rome - Census of 14 AD (population: 4937000)"
    );
  }

  #[test]
  fn last_topic_and_source_are_guarded() {
    let mut f = fixture();
    let id = f
      .facts
      .record(NewFact::new("x").with_topic(f.rome).with_source(f.book), &f.graph, &f.sources)
      .unwrap();

    assert!(matches!(f.facts.remove_topic(id, f.rome), Err(Error::LastTopic(_))));
    assert!(matches!(f.facts.remove_source(id, f.book), Err(Error::LastSource(_))));

    assert!(f.facts.add_topic(id, f.empire, &f.graph).unwrap());
    assert!(!f.facts.add_topic(id, f.empire, &f.graph).unwrap());
    assert!(f.facts.remove_topic(id, f.rome).unwrap());
    assert!(!f.facts.remove_topic(id, f.rome).unwrap());
    assert_eq!(f.facts.tagged_with(f.rome).count(), 0);
    assert_eq!(f.facts.tagged_with(f.empire).collect::<Vec<_>>(), vec![id]);
  }

  #[test]
  fn removing_the_context_topic_clears_it() {
    let mut f = fixture();
    let id = f
      .facts
      .record(
        NewFact::new("x").with_context(f.rome).with_topic(f.empire).with_source(f.book),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    f.facts.remove_topic(id, f.rome).unwrap();
    assert_eq!(f.facts.fact(id).unwrap().context, None);
  }

  #[test]
  fn deleting_a_fact_clears_restatements() {
    let mut f = fixture();
    let first = f
      .facts
      .record(NewFact::new("x").with_topic(f.rome).with_source(f.book), &f.graph, &f.sources)
      .unwrap();
    let second = f
      .facts
      .record(
        NewFact::new("x").with_topic(f.rome).with_source(f.book).restating(first),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    assert_eq!(f.facts.restatements(first).collect::<Vec<_>>(), vec![second]);

    f.facts.delete(first).unwrap();
    assert_eq!(f.facts.fact(second).unwrap().restated_from, None);
    assert!(matches!(f.facts.delete(first), Err(Error::FactNotFound(_))));
  }

  #[test]
  fn failed_edits_leave_the_fact_untouched() {
    let mut f = fixture();
    let id = f
      .facts
      .record(NewFact::new("x").with_topic(f.rome).with_source(f.book), &f.graph, &f.sources)
      .unwrap();
    f.facts.take_deltas();
    let before = f.facts.fact(id).unwrap().clone();

    assert!(f.facts.edit_statement(id, "   ").is_err());
    assert!(f.facts.set_payload(id, "n", PayloadValue::Number(f64::NAN), &f.graph).is_err());
    assert_eq!(f.facts.fact(id).unwrap(), &before);
    assert!(f.facts.take_deltas().is_empty());
  }

  #[test]
  fn retag_moves_every_reference() {
    let mut f = fixture();
    let id = f
      .facts
      .record(
        NewFact::new("x")
          .with_context(f.rome)
          .with_attribute("population", PayloadValue::Topic(f.rome))
          .with_source(f.book),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    f.facts.retag(id, f.rome, f.empire).unwrap();

    let fact = f.facts.fact(id).unwrap();
    assert_eq!(fact.topics, BTreeSet::from([f.empire]));
    assert_eq!(fact.context, Some(f.empire));
    assert_eq!(fact.mentions().collect::<Vec<_>>(), vec![f.empire]);
    assert!(f.facts.referencing(f.rome).is_empty());
  }

  #[test]
  fn moving_a_period_reindexes_every_fact_in_it() {
    let mut f = fixture();
    let day = |d| NaiveDate::from_ymd_opt(64, 7, d).unwrap();
    let fire = f.facts.create_period(DateRange::on(day(18))).unwrap();
    let a = f
      .facts
      .record(
        NewFact::new("Fire breaks out").with_topic(f.rome).with_source(f.book).with_period(fire),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    let b = f
      .facts
      .record(
        NewFact::new("Nero in Antium").with_topic(f.empire).with_source(f.book).with_period(fire),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    f.facts.take_deltas();
    let stamped = f.facts.fact(a).unwrap().modified_at;

    f.facts.update_period(fire, DateRange::new(Some(day(18)), Some(day(24)))).unwrap();
    assert_eq!(f.facts.take_deltas(), vec![
      IndexDelta::FactUpserted(a.min(b)),
      IndexDelta::FactUpserted(a.max(b)),
    ]);
    assert_eq!(f.facts.fact(a).unwrap().modified_at, stamped);
    assert_eq!(
      f.facts.span_of(f.facts.fact(b).unwrap()),
      Some(DateRange::new(Some(day(18)), Some(day(24))))
    );

    // Unchanged spans queue nothing.
    f.facts.update_period(fire, DateRange::new(Some(day(18)), Some(day(24)))).unwrap();
    assert!(f.facts.take_deltas().is_empty());
  }

  #[test]
  fn deleting_a_period_leaves_its_facts_undated() {
    let mut f = fixture();
    let period = f.facts.create_period(DateRange::default()).unwrap();
    let id = f
      .facts
      .record(
        NewFact::new("x").with_topic(f.rome).with_source(f.book).with_period(period),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    assert_eq!(f.facts.scheduled_in(period).collect::<Vec<_>>(), vec![id]);

    f.facts.delete_period(period).unwrap();
    assert_eq!(f.facts.fact(id).unwrap().period, None);
    assert!(f.facts.periods().is_empty());
    assert!(matches!(f.facts.set_period(id, Some(period)), Err(Error::PeriodNotFound(_))));
  }

  #[test]
  fn unknown_periods_are_rejected_on_record() {
    let mut f = fixture();
    let err = f
      .facts
      .record(
        NewFact::new("x").with_topic(f.rome).with_source(f.book).with_period(PeriodId::new()),
        &f.graph,
        &f.sources,
      )
      .unwrap_err();
    assert!(err.is_not_found());
    assert!(f.facts.is_empty());
  }

  #[test]
  fn restatements_are_never_newer_than_the_restating_fact() {
    let mut f = fixture();
    let first = f
      .facts
      .record(NewFact::new("x").with_topic(f.rome).with_source(f.book), &f.graph, &f.sources)
      .unwrap();
    let second = f
      .facts
      .record(
        NewFact::new("x").with_topic(f.rome).with_source(f.book).restating(first),
        &f.graph,
        &f.sources,
      )
      .unwrap();
    let (a, b) = (f.facts.fact(first).unwrap(), f.facts.fact(second).unwrap());
    assert!(a.created_at <= b.created_at);

    // Stored data claiming the opposite order is refused.
    let mut records: Vec<Fact> = f.facts.iter().cloned().collect();
    for fact in &mut records {
      if fact.fact_id == first {
        fact.created_at = b.created_at + chrono::Duration::seconds(1);
      }
    }
    let err =
      FactStore::from_records(records, Vec::<Period>::new(), &f.graph, &f.sources).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn restatement_loops_are_refused_on_load() {
    let f = fixture();
    let now = Utc::now();
    let (a, b) = (FactId::new(), FactId::new());
    let fact = |id, earlier| Fact {
      fact_id:       id,
      statement:     "x".into(),
      payload:       BTreeMap::new(),
      context:       None,
      period:        None,
      topics:        BTreeSet::from([f.rome]),
      sources:       BTreeSet::from([f.book]),
      restated_from: Some(earlier),
      created_at:    now,
      modified_at:   now,
    };
    let loaded =
      FactStore::from_records([fact(a, b), fact(b, a)], Vec::<Period>::new(), &f.graph, &f.sources);
    let err = loaded.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }
}
