//! Property tests for the hierarchy, fact and index invariants.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use ibis_core::{
  KnowledgeBase, Policy, Snapshot, Transaction,
  batch::{SplitPart, SplitRequest},
  fact::{NewFact, PayloadValue},
  graph::TopicGraph,
  id::{FactId, PeriodId, SourceId, TopicId},
  period::DateRange,
  query::Query,
  source::{NewSource, SourceKind},
  topic::{NewTopic, TopicKind},
};
use proptest::prelude::*;

const TOPICS: usize = 8;
const SOURCES: usize = 3;

// ─── Hierarchy ───────────────────────────────────────────────────────────────

fn graph_with(n: usize) -> (TopicGraph, Vec<TopicId>) {
  let mut graph = TopicGraph::new();
  let ids = (0..n)
    .map(|i| graph.create(NewTopic::new(format!("t{i}"), TopicKind::Generic)).unwrap())
    .collect();
  (graph, ids)
}

proptest! {
  #[test]
  fn parent_links_never_form_a_cycle(
    edges in prop::collection::vec((0..TOPICS, 0..TOPICS), 0..40),
  ) {
    let (mut graph, ids) = graph_with(TOPICS);
    for (child, parent) in edges {
      let before = graph.topic(ids[child]).unwrap().parents.clone();
      match graph.add_parent(ids[child], ids[parent]) {
        Ok(_) => {}
        Err(_) => prop_assert_eq!(&graph.topic(ids[child]).unwrap().parents, &before),
      }
      prop_assert!(graph.check_acyclic().is_ok());
    }
  }

  #[test]
  fn descendants_are_reflexive_and_closed(
    edges in prop::collection::vec((0..TOPICS, 0..TOPICS), 0..40),
  ) {
    let (mut graph, ids) = graph_with(TOPICS);
    for (child, parent) in edges {
      let _ = graph.add_parent(ids[child], ids[parent]);
    }
    for id in &ids {
      let below = graph.descendants(*id).unwrap();
      prop_assert!(below.contains(id));
      for t in &below {
        for kid in graph.children_of(*t) {
          prop_assert!(below.contains(&kid));
        }
      }
    }
  }
}

// ─── Operations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
  Record { topics: Vec<usize>, source: usize },
  AddTopic { fact: usize, topic: usize },
  RemoveTopic { fact: usize, topic: usize },
  AddSource { fact: usize, source: usize },
  RemoveSource { fact: usize, source: usize },
  SetPayload { fact: usize, value: i32 },
  DeleteFact { fact: usize },
  AddParent { child: usize, parent: usize },
  RemoveParent { child: usize, parent: usize },
  Merge { sources: Vec<usize>, target: usize },
  Split { topic: usize, take: Vec<bool> },
  CreatePeriod { start: i64, days: i64 },
  SetPeriod { fact: usize, period: Option<usize> },
  MovePeriod { period: usize, start: i64, days: i64 },
  DeletePeriod { period: usize },
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    3 => (prop::collection::vec(0..TOPICS, 1..3), 0..SOURCES)
      .prop_map(|(topics, source)| Op::Record { topics, source }),
    1 => (0..16usize, 0..TOPICS).prop_map(|(fact, topic)| Op::AddTopic { fact, topic }),
    1 => (0..16usize, 0..TOPICS).prop_map(|(fact, topic)| Op::RemoveTopic { fact, topic }),
    1 => (0..16usize, 0..SOURCES).prop_map(|(fact, source)| Op::AddSource { fact, source }),
    1 => (0..16usize, 0..SOURCES).prop_map(|(fact, source)| Op::RemoveSource { fact, source }),
    1 => (0..16usize, -5..5i32).prop_map(|(fact, value)| Op::SetPayload { fact, value }),
    1 => (0..16usize).prop_map(|fact| Op::DeleteFact { fact }),
    2 => (0..TOPICS, 0..TOPICS).prop_map(|(child, parent)| Op::AddParent { child, parent }),
    1 => (0..TOPICS, 0..TOPICS).prop_map(|(child, parent)| Op::RemoveParent { child, parent }),
    1 => (prop::collection::vec(0..TOPICS, 0..3), 0..TOPICS)
      .prop_map(|(sources, target)| Op::Merge { sources, target }),
    1 => (0..TOPICS, prop::collection::vec(any::<bool>(), 0..8))
      .prop_map(|(topic, take)| Op::Split { topic, take }),
    1 => (0..400i64, 0..60i64).prop_map(|(start, days)| Op::CreatePeriod { start, days }),
    1 => (0..16usize, prop::option::of(0..4usize))
      .prop_map(|(fact, period)| Op::SetPeriod { fact, period }),
    1 => (0..4usize, 0..400i64, 0..60i64)
      .prop_map(|(period, start, days)| Op::MovePeriod { period, start, days }),
    1 => (0..4usize).prop_map(|period| Op::DeletePeriod { period }),
  ]
}

/// Seed topics and sources; facts are created by the ops.
fn seeded() -> (KnowledgeBase, Vec<SourceId>) {
  let kb = KnowledgeBase::new(Policy::default());
  let sources: Vec<SourceId> = kb
    .write(|tx| {
      for i in 0..TOPICS {
        tx.create_topic(NewTopic::new(format!("t{i}"), TopicKind::Generic))?;
      }
      (0..SOURCES)
        .map(|i| tx.create_source(NewSource::new(format!("s{i}"), SourceKind::Book)))
        .collect()
    })
    .unwrap();
  (kb, sources)
}

/// Topics are looked up by position among the live topics, so ops keep
/// meaning after merges and splits change the topic set.
fn nth_topic(snapshot: &Snapshot, i: usize) -> Option<TopicId> {
  let n = snapshot.topics().len();
  (n > 0).then(|| snapshot.topics().iter().nth(i % n).map(|t| t.topic_id)).flatten()
}

fn nth_fact(snapshot: &Snapshot, i: usize) -> Option<FactId> {
  let n = snapshot.facts().len();
  (n > 0).then(|| snapshot.facts().iter().nth(i % n).map(|f| f.fact_id)).flatten()
}

fn nth_period(snapshot: &Snapshot, i: usize) -> Option<PeriodId> {
  let n = snapshot.periods().len();
  (n > 0).then(|| snapshot.periods().iter().nth(i % n).map(|p| p.period_id)).flatten()
}

/// `days` long, starting `start` days into 1900.
fn span(start: i64, days: i64) -> DateRange {
  let epoch = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
  let first = epoch + Days::new(start.unsigned_abs());
  DateRange::new(Some(first), Some(first + Days::new(days.unsigned_abs())))
}

fn run(tx: &mut Transaction<'_>, op: &Op, sources: &[SourceId], split_count: &mut usize) {
  let snapshot = tx.snapshot().clone();
  let topic = |i: usize| nth_topic(&snapshot, i);
  let fact = |i: usize| nth_fact(&snapshot, i);
  let period = |i: usize| nth_period(&snapshot, i);
  // Rejections are expected; the invariants are checked afterwards.
  let _ = match op {
    Op::Record { topics, source } => {
      let topics: Vec<TopicId> = topics.iter().filter_map(|i| topic(*i)).collect();
      tx.record_fact(NewFact::new("claim").with_topics(topics).with_source(sources[*source]))
        .map(drop)
    }
    Op::AddTopic { fact: f, topic: t } => match (fact(*f), topic(*t)) {
      (Some(f), Some(t)) => tx.add_topic(f, t).map(drop),
      _ => Ok(()),
    },
    Op::RemoveTopic { fact: f, topic: t } => match (fact(*f), topic(*t)) {
      (Some(f), Some(t)) => tx.remove_topic(f, t).map(drop),
      _ => Ok(()),
    },
    Op::AddSource { fact: f, source } => match fact(*f) {
      Some(f) => tx.add_source(f, sources[*source]).map(drop),
      None => Ok(()),
    },
    Op::RemoveSource { fact: f, source } => match fact(*f) {
      Some(f) => tx.remove_source(f, sources[*source]).map(drop),
      None => Ok(()),
    },
    Op::SetPayload { fact: f, value } => match fact(*f) {
      Some(f) => tx.set_payload(f, "n", PayloadValue::Number(f64::from(*value))).map(drop),
      None => Ok(()),
    },
    Op::DeleteFact { fact: f } => match fact(*f) {
      Some(f) => tx.delete_fact(f),
      None => Ok(()),
    },
    Op::AddParent { child, parent } => match (topic(*child), topic(*parent)) {
      (Some(c), Some(p)) => tx.add_parent(c, p).map(drop),
      _ => Ok(()),
    },
    Op::RemoveParent { child, parent } => match (topic(*child), topic(*parent)) {
      (Some(c), Some(p)) => tx.remove_parent(c, p).map(drop),
      _ => Ok(()),
    },
    Op::Merge { sources: from, target } => match topic(*target) {
      Some(target) => {
        let from: BTreeSet<TopicId> = from.iter().filter_map(|i| topic(*i)).collect();
        tx.merge_topics(&from, target).map(drop)
      }
      None => Ok(()),
    },
    Op::Split { topic: t, take } => match topic(*t) {
      Some(t) => {
        *split_count += 1;
        let name = format!("split{split_count}");
        let tagged: Vec<FactId> = snapshot.facts().tagged_with(t).collect();
        let mut request = SplitRequest::new(t).part(SplitPart::new(&name));
        for (fact, take) in tagged.iter().zip(take) {
          if *take {
            request = request.assign(*fact, &name);
          }
        }
        tx.split_topic(&request).map(drop)
      }
      None => Ok(()),
    },
    Op::CreatePeriod { start, days } => tx.create_period(span(*start, *days)).map(drop),
    Op::SetPeriod { fact: f, period: p } => match fact(*f) {
      Some(f) => tx.set_period(f, p.and_then(period)),
      None => Ok(()),
    },
    Op::MovePeriod { period: p, start, days } => match period(*p) {
      Some(p) => tx.update_period(p, span(*start, *days)),
      None => Ok(()),
    },
    Op::DeletePeriod { period: p } => match period(*p) {
      Some(p) => tx.delete_period(p).map(drop),
      None => Ok(()),
    },
  };
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn incremental_index_matches_rebuild(
    ops in prop::collection::vec(op(), 1..40),
  ) {
    let (kb, sources) = seeded();
    let mut splits = 0;
    for op in &ops {
      let mut tx = kb.begin();
      run(&mut tx, op, &sources, &mut splits);
      tx.commit();

      let snapshot = kb.snapshot();
      prop_assert!(snapshot.verify().is_ok(), "index diverged after {:?}", op);
      prop_assert!(snapshot.topics().check_acyclic().is_ok());
      for fact in snapshot.facts().iter() {
        prop_assert!(!fact.topics.is_empty());
        prop_assert!(!fact.sources.is_empty());
        if let Some(period) = fact.period {
          prop_assert!(snapshot.periods().contains(period));
        }
      }
    }
  }

  #[test]
  fn merge_unions_previous_results(
    ops in prop::collection::vec(op(), 1..30),
    a in 0..TOPICS,
    b in 0..TOPICS,
    c in 0..TOPICS,
  ) {
    let (kb, sources) = seeded();
    let mut splits = 0;
    for op in &ops {
      let mut tx = kb.begin();
      run(&mut tx, op, &sources, &mut splits);
      tx.commit();
    }

    let before = kb.snapshot();
    let (Some(a), Some(b), Some(c)) =
      (nth_topic(&before, a), nth_topic(&before, b), nth_topic(&before, c))
    else {
      return Ok(());
    };
    let merged: BTreeSet<TopicId> = [a, b].into_iter().filter(|t| *t != c).collect();
    let mut expected = BTreeSet::new();
    for t in [a, b, c] {
      expected.extend(before.query(&Query::new().topic(t)).unwrap().to_set());
    }

    match kb.write(|tx| tx.merge_topics(&merged, c)) {
      Ok(_) => {
        let after = kb.snapshot();
        prop_assert_eq!(after.query(&Query::new().topic(c)).unwrap().to_set(), expected);
        for t in &merged {
          prop_assert!(!after.topics().contains(*t));
        }
      }
      // A cyclic merge is rejected and nothing changes.
      Err(_) => prop_assert_eq!(kb.snapshot().export(), before.export()),
    }
  }
}
