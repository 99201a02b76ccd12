//! Single-writer, multi-reader access to the knowledge base.
//!
//! The committed state is an `Arc<Snapshot>`. Readers clone the `Arc` and
//! query it without holding any lock. A writer takes the writer mutex, stages
//! a private copy of the snapshot, applies its operations to the copy and
//! publishes it with one pointer swap on commit. The copy shares every
//! component it has not written to with the committed snapshot. Dropping a
//! [`Transaction`] without committing discards the copy.

use std::{collections::BTreeSet, sync::Arc};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::{
  batch::{BatchReport, BatchTagOperator, SplitRequest},
  error::{Error, Result},
  fact::{NewFact, PayloadValue},
  id::{FactId, PeriodId, SourceId, TopicId},
  period::{DateRange, Period},
  policy::Policy,
  snapshot::{Records, Snapshot},
  source::{NewSource, Source},
  topic::{NewTopic, Topic, TopicKind},
};

pub struct KnowledgeBase {
  committed: RwLock<Arc<Snapshot>>,
  writer:    Mutex<()>,
  policy:    Policy,
}

impl Default for KnowledgeBase {
  fn default() -> Self { Self::new(Policy::default()) }
}

impl KnowledgeBase {
  pub fn new(policy: Policy) -> Self { Self::from_snapshot(Snapshot::new(), policy) }

  pub fn from_snapshot(snapshot: Snapshot, policy: Policy) -> Self {
    Self {
      committed: RwLock::new(Arc::new(snapshot)),
      writer: Mutex::new(()),
      policy,
    }
  }

  /// Validate stored records and open a knowledge base over them.
  pub fn from_records(records: Records, policy: Policy) -> Result<Self> {
    Ok(Self::from_snapshot(Snapshot::import(records)?, policy))
  }

  pub fn policy(&self) -> Policy { self.policy }

  /// The last committed snapshot. Never blocks on a writer.
  pub fn snapshot(&self) -> Arc<Snapshot> { self.committed.read().clone() }

  /// Start a write. Blocks while another transaction is open.
  pub fn begin(&self) -> Transaction<'_> {
    let guard = self.writer.lock();
    let staged = Snapshot::clone(&self.snapshot());
    Transaction { base: self, _writer: guard, staged }
  }

  /// Run `f` in a transaction, committing if it succeeds and discarding every
  /// change if it fails.
  pub fn write<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
    let mut tx = self.begin();
    let out = f(&mut tx)?;
    tx.commit();
    Ok(out)
  }
}

/// A staged write. Operations see their own earlier effects through
/// [`Transaction::snapshot`]; nothing is visible to readers until
/// [`Transaction::commit`].
pub struct Transaction<'a> {
  base:    &'a KnowledgeBase,
  _writer: MutexGuard<'a, ()>,
  staged:  Snapshot,
}

impl Transaction<'_> {
  /// The staged state, including uncommitted changes.
  pub fn snapshot(&self) -> &Snapshot { &self.staged }

  /// Publish the staged state and release the writer role.
  pub fn commit(self) -> Arc<Snapshot> {
    let Transaction { base, _writer, mut staged } = self;
    staged.sync_index();
    let snapshot = Arc::new(staged);
    *base.committed.write() = Arc::clone(&snapshot);
    debug!(
      topics = snapshot.graph.len(),
      facts = snapshot.facts.len(),
      "committed snapshot"
    );
    snapshot
  }

  /// Discard every staged change.
  pub fn abort(self) {
    debug!("aborted transaction");
  }

  fn apply<T>(&mut self, op: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
    let out = op(&mut self.staged);
    self.staged.sync_index();
    out
  }

  // ── Topics ────────────────────────────────────────────────────────────────

  pub fn create_topic(&mut self, input: NewTopic) -> Result<TopicId> {
    self.apply(|s| Arc::make_mut(&mut s.graph).create(input))
  }

  /// The topic of `kind` called `name`, created as a root topic if missing.
  pub fn ensure_topic(&mut self, name: &str, kind: TopicKind) -> Result<TopicId> {
    if let Some(topic) = self.staged.graph.resolve(&kind, name) {
      return Ok(topic.topic_id);
    }
    self.create_topic(NewTopic::new(name, kind))
  }

  pub fn add_parent(&mut self, child: TopicId, parent: TopicId) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.graph).add_parent(child, parent))
  }

  /// Unlink under the configured rooting policy.
  pub fn remove_parent(&mut self, child: TopicId, parent: TopicId) -> Result<bool> {
    let require_rooted = self.base.policy.require_rooted;
    self.remove_parent_with(child, parent, require_rooted)
  }

  pub fn remove_parent_with(
    &mut self,
    child: TopicId,
    parent: TopicId,
    require_rooted: bool,
  ) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.graph).remove_parent(child, parent, require_rooted))
  }

  pub fn rename_topic(&mut self, id: TopicId, name: &str) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.graph).rename(id, name))
  }

  pub fn add_alias(&mut self, id: TopicId, alias: &str) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.graph).add_alias(id, alias))
  }

  pub fn remove_alias(&mut self, id: TopicId, alias: &str) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.graph).remove_alias(id, alias))
  }

  pub fn describe_topic(&mut self, id: TopicId, description: &str) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.graph).set_description(id, description))
  }

  /// Declare a schema key. Facts already using the topic as context must
  /// carry only declared keys afterwards.
  pub fn declare_schema_key(&mut self, id: TopicId, key: &str) -> Result<bool> {
    self.apply(|s| {
      let mut schema = s.graph.topic(id)?.schema.clone();
      schema.insert(key.trim().to_owned());
      ensure_context_keys(s, id, |k| schema.contains(k))?;
      Arc::make_mut(&mut s.graph).declare_schema_key(id, key)
    })
  }

  pub fn remove_schema_key(&mut self, id: TopicId, key: &str) -> Result<bool> {
    self.apply(|s| {
      let mut schema = s.graph.topic(id)?.schema.clone();
      schema.remove(key.trim());
      ensure_context_keys(s, id, |k| schema.is_empty() || schema.contains(k))?;
      Arc::make_mut(&mut s.graph).remove_schema_key(id, key)
    })
  }

  /// Delete a topic nothing refers to. Its children lose the link; under
  /// [`Policy::require_rooted`] a child whose only parent it is fails the
  /// delete with [`Error::Orphan`].
  pub fn delete_topic(&mut self, id: TopicId) -> Result<Topic> {
    let require_rooted = self.base.policy.require_rooted;
    self.apply(|s| {
      s.graph.topic(id)?;
      let referencing = s.facts.referencing(id).len();
      if referencing > 0 {
        return Err(Error::TopicReferenced { topic_id: id, facts: referencing });
      }
      if require_rooted
        && let Some(kid) = s.graph.children_of(id).find(|kid| {
          s.graph.get(*kid).is_some_and(|t| t.parents.len() == 1)
        })
      {
        return Err(Error::Orphan(kid));
      }
      Arc::make_mut(&mut s.graph).remove(id)
    })
  }

  // ── Sources ───────────────────────────────────────────────────────────────

  pub fn create_source(&mut self, input: NewSource) -> Result<SourceId> {
    self.apply(|s| Arc::make_mut(&mut s.sources).create(input))
  }

  pub fn update_source(&mut self, id: SourceId, input: NewSource) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.sources).update(id, input))
  }

  pub fn delete_source(&mut self, id: SourceId) -> Result<Source> {
    self.apply(|s| Arc::make_mut(&mut s.sources).delete(id, &s.facts))
  }

  // ── Facts ─────────────────────────────────────────────────────────────────

  pub fn record_fact(&mut self, input: NewFact) -> Result<FactId> {
    self.apply(|s| Arc::make_mut(&mut s.facts).record(input, &s.graph, &s.sources))
  }

  pub fn add_topic(&mut self, fact: FactId, topic: TopicId) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.facts).add_topic(fact, topic, &s.graph))
  }

  pub fn remove_topic(&mut self, fact: FactId, topic: TopicId) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.facts).remove_topic(fact, topic))
  }

  pub fn add_source(&mut self, fact: FactId, source: SourceId) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.facts).add_source(fact, source, &s.sources))
  }

  pub fn remove_source(&mut self, fact: FactId, source: SourceId) -> Result<bool> {
    self.apply(|s| Arc::make_mut(&mut s.facts).remove_source(fact, source))
  }

  pub fn set_payload(
    &mut self,
    fact: FactId,
    key: &str,
    value: PayloadValue,
  ) -> Result<Option<PayloadValue>> {
    self.apply(|s| Arc::make_mut(&mut s.facts).set_payload(fact, key, value, &s.graph))
  }

  pub fn remove_payload(&mut self, fact: FactId, key: &str) -> Result<Option<PayloadValue>> {
    self.apply(|s| Arc::make_mut(&mut s.facts).remove_payload(fact, key))
  }

  pub fn set_context(&mut self, fact: FactId, context: Option<TopicId>) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.facts).set_context(fact, context, &s.graph))
  }

  pub fn set_period(&mut self, fact: FactId, period: Option<PeriodId>) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.facts).set_period(fact, period))
  }

  pub fn edit_statement(&mut self, fact: FactId, statement: &str) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.facts).edit_statement(fact, statement))
  }

  pub fn delete_fact(&mut self, fact: FactId) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.facts).delete(fact).map(drop))
  }

  // ── Periods ───────────────────────────────────────────────────────────────

  pub fn create_period(&mut self, span: DateRange) -> Result<PeriodId> {
    self.apply(|s| Arc::make_mut(&mut s.facts).create_period(span))
  }

  /// Move a period and with it every fact taking place in it.
  pub fn update_period(&mut self, id: PeriodId, span: DateRange) -> Result<()> {
    self.apply(|s| Arc::make_mut(&mut s.facts).update_period(id, span))
  }

  /// Delete a period; facts in it become undated.
  pub fn delete_period(&mut self, id: PeriodId) -> Result<Period> {
    self.apply(|s| Arc::make_mut(&mut s.facts).delete_period(id))
  }

  // ── Batches ───────────────────────────────────────────────────────────────

  pub fn merge_topics(
    &mut self,
    sources: &BTreeSet<TopicId>,
    target: TopicId,
  ) -> Result<BatchReport> {
    let policy = self.base.policy;
    self.apply(|s| s.batch(policy).merge(sources, target))
  }

  pub fn split_topic(&mut self, request: &SplitRequest) -> Result<BatchReport> {
    let policy = self.base.policy;
    self.apply(|s| s.batch(policy).split(request))
  }
}

impl Snapshot {
  fn batch(&mut self, policy: Policy) -> BatchTagOperator<'_> {
    BatchTagOperator::new(
      Arc::make_mut(&mut self.graph),
      &self.sources,
      Arc::make_mut(&mut self.facts),
      Arc::make_mut(&mut self.index),
      policy,
    )
  }
}

/// Every fact using `topic` as context must carry only keys `allowed` accepts.
fn ensure_context_keys(
  snapshot: &Snapshot,
  topic: TopicId,
  allowed: impl Fn(&str) -> bool,
) -> Result<()> {
  for id in snapshot.facts.tagged_with(topic) {
    let fact = snapshot.facts.fact(id)?;
    if fact.context != Some(topic) {
      continue;
    }
    if let Some(key) = fact.payload.keys().find(|k| !allowed(k.as_str())) {
      return Err(Error::invalid(format!(
        "fact {id} uses this topic as context and carries undeclared attribute {key:?}"
      )));
    }
  }
  Ok(())
}
