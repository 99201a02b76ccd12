//! End-to-end scenarios through [`KnowledgeBase`].

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::{
  Error, KnowledgeBase, Policy, Records, Snapshot,
  batch::{SplitPart, SplitRequest},
  fact::{NewFact, PayloadValue},
  id::{FactId, SourceId, TopicId},
  period::DateRange,
  query::{MatchMode, Query},
  source::{NewSource, SourceKind},
  topic::{NewTopic, TopicKind},
};

struct Europe {
  kb:     KnowledgeBase,
  europe: TopicId,
  france: TopicId,
  paris:  TopicId,
  book_x: SourceId,
  f1:     FactId,
}

fn europe() -> Europe {
  let kb = KnowledgeBase::default();
  let (europe, france, paris, book_x, f1) = kb
    .write(|tx| {
      let europe = tx.create_topic(NewTopic::new("Europe", TopicKind::Place))?;
      let france =
        tx.create_topic(NewTopic::new("France", TopicKind::Place).with_parent(europe))?;
      let paris =
        tx.create_topic(NewTopic::new("Paris", TopicKind::Place).with_parent(france))?;
      let book_x = tx.create_source(NewSource::new("Book X", SourceKind::Book))?;
      let f1 = tx.record_fact(
        NewFact::new("The Eiffel Tower opened in 1889")
          .with_topic(paris)
          .with_source(book_x),
      )?;
      Ok((europe, france, paris, book_x, f1))
    })
    .unwrap();
  Europe { kb, europe, france, paris, book_x, f1 }
}

fn ids(snapshot: &Snapshot, query: &Query) -> crate::Result<BTreeSet<FactId>> {
  Ok(snapshot.query(query)?.to_set())
}

// ─── Recall ──────────────────────────────────────────────────────────────────

#[test]
fn ancestor_query_finds_descendant_fact() {
  let w = europe();
  let snapshot = w.kb.snapshot();

  let hits = snapshot.query_by_topics([w.europe], MatchMode::Any).unwrap();
  assert_eq!(hits.to_vec(), vec![w.f1]);
  assert_eq!(ids(&snapshot, &Query::new().topic(w.paris)).unwrap(), BTreeSet::from([w.f1]));
}

#[test]
fn unknown_topic_is_not_found() {
  let w = europe();
  let err = ids(&w.kb.snapshot(), &Query::new().place("Germany")).unwrap_err();
  assert!(err.is_not_found());
}

#[test]
fn person_and_place_queries_are_typed() {
  let w = europe();
  let eiffel = w
    .kb
    .write(|tx| {
      let eiffel = tx.ensure_topic("Gustave Eiffel", TopicKind::Person)?;
      tx.add_topic(w.f1, eiffel)?;
      Ok(eiffel)
    })
    .unwrap();
  let snapshot = w.kb.snapshot();

  let q = Query::new().person("Gustave Eiffel").place("Paris").mode(MatchMode::All);
  assert_eq!(ids(&snapshot, &q).unwrap(), BTreeSet::from([w.f1]));
  assert!(ids(&snapshot, &Query::new().place("Gustave Eiffel")).is_err());
  assert_eq!(snapshot.topics().topic(eiffel).unwrap().kind, TopicKind::Person);
}

#[test]
fn date_and_attribute_filters_intersect_with_topics() {
  let w = europe();
  let day = NaiveDate::from_ymd_opt(1889, 3, 31).unwrap();
  let notre_dame = w
    .kb
    .write(|tx| {
      let opening = tx.create_period(DateRange::on(day))?;
      let gothic = tx.create_period(DateRange::on(NaiveDate::from_ymd_opt(1345, 1, 1).unwrap()))?;
      tx.set_period(w.f1, Some(opening))?;
      tx.set_payload(w.f1, "height_m", PayloadValue::Number(300.0))?;
      tx.record_fact(
        NewFact::new("Notre-Dame was completed")
          .with_topic(w.paris)
          .with_source(w.book_x)
          .with_attribute("height_m", PayloadValue::Number(69.0))
          .with_period(gothic),
      )
    })
    .unwrap();
  let snapshot = w.kb.snapshot();

  let nineteenth =
    DateRange::new(NaiveDate::from_ymd_opt(1800, 1, 1), NaiveDate::from_ymd_opt(1899, 12, 31));
  let q = Query::new().topic(w.europe).during(nineteenth);
  assert_eq!(ids(&snapshot, &q).unwrap(), BTreeSet::from([w.f1]));

  let tall = Query::new()
    .topic(w.france)
    .between("height_m", Some(PayloadValue::Number(100.0)), None);
  assert_eq!(ids(&snapshot, &tall).unwrap(), BTreeSet::from([w.f1]));

  let short = Query::new().between("height_m", None, Some(PayloadValue::Number(100.0)));
  assert_eq!(ids(&snapshot, &short).unwrap(), BTreeSet::from([notre_dame]));
}

#[test]
fn correcting_a_shared_period_moves_every_fact_in_it() {
  let w = europe();
  let day = |m, d| NaiveDate::from_ymd_opt(1889, m, d).unwrap();
  let (fair, f2) = w
    .kb
    .write(|tx| {
      let fair = tx.create_period(DateRange::new(Some(day(5, 6)), Some(day(10, 31))))?;
      tx.set_period(w.f1, Some(fair))?;
      let f2 = tx.record_fact(
        NewFact::new("The Galerie des machines was shown")
          .with_topic(w.paris)
          .with_source(w.book_x)
          .with_period(fair),
      )?;
      Ok((fair, f2))
    })
    .unwrap();
  let march = Query::new().topic(w.europe).during(DateRange::on(day(3, 31)));
  assert!(ids(&w.kb.snapshot(), &march).unwrap().is_empty());

  w.kb
    .write(|tx| tx.update_period(fair, DateRange::new(Some(day(3, 31)), Some(day(10, 31)))))
    .unwrap();
  let snapshot = w.kb.snapshot();
  assert_eq!(ids(&snapshot, &march).unwrap(), BTreeSet::from([w.f1, f2]));
  assert!(snapshot.verify().is_ok());

  let records = snapshot.export();
  assert_eq!(records.periods.len(), 1);
  let reloaded = Snapshot::import(records).unwrap();
  assert_eq!(ids(&reloaded, &march).unwrap(), BTreeSet::from([w.f1, f2]));
}

// ─── Integrity ───────────────────────────────────────────────────────────────

#[test]
fn last_source_is_guarded_until_a_second_is_added() {
  let w = europe();
  let err = w.kb.write(|tx| tx.remove_source(w.f1, w.book_x)).unwrap_err();
  assert!(matches!(err, Error::LastSource(id) if id == w.f1));

  w.kb
    .write(|tx| {
      let guide = tx.create_source(NewSource::new("Guide Bleu", SourceKind::Book))?;
      tx.add_source(w.f1, guide)?;
      tx.remove_source(w.f1, w.book_x)
    })
    .unwrap();
  let snapshot = w.kb.snapshot();
  assert!(!snapshot.facts().fact(w.f1).unwrap().cites(w.book_x));
}

#[test]
fn cited_sources_cannot_be_deleted() {
  let w = europe();
  let err = w.kb.write(|tx| tx.delete_source(w.book_x)).unwrap_err();
  assert!(matches!(err, Error::SourceReferenced { facts: 1, .. }));
}

#[test]
fn cycles_are_rejected_without_side_effects() {
  let w = europe();
  let err = w.kb.write(|tx| tx.add_parent(w.europe, w.paris)).unwrap_err();
  assert!(matches!(err, Error::Cycle { .. }));
  assert!(w.kb.snapshot().topics().topic(w.europe).unwrap().is_root());
}

#[test]
fn bibliography_is_deduplicated_in_citation_order() {
  let w = europe();
  let (guide, f2) = w
    .kb
    .write(|tx| {
      let guide = tx.create_source(NewSource::new("Guide Bleu", SourceKind::Book))?;
      let f2 = tx.record_fact(
        NewFact::new("Paris hosted the 1889 World's Fair")
          .with_topic(w.paris)
          .with_sources([guide, w.book_x]),
      )?;
      Ok((guide, f2))
    })
    .unwrap();
  let snapshot = w.kb.snapshot();

  let titles: Vec<String> = snapshot
    .sources_for_facts([w.f1, f2])
    .unwrap()
    .into_iter()
    .map(|s| s.title.clone())
    .collect();
  assert_eq!(titles, vec!["Book X".to_owned(), "Guide Bleu".to_owned()]);
  assert_eq!(snapshot.sources_for_facts([f2]).unwrap().len(), 2);
  assert!(snapshot.sources().contains(guide));
}

// ─── Batches ─────────────────────────────────────────────────────────────────

#[test]
fn merge_into_western_europe() {
  let w = europe();
  let west = w
    .kb
    .write(|tx| {
      tx.create_topic(NewTopic::new("Western Europe", TopicKind::Place).with_parent(w.europe))
    })
    .unwrap();

  let report = w
    .kb
    .write(|tx| tx.merge_topics(&BTreeSet::from([w.france]), west))
    .unwrap();
  assert_eq!(report.removed, vec![w.france]);

  let snapshot = w.kb.snapshot();
  assert_eq!(ids(&snapshot, &Query::new().topic(west)).unwrap(), BTreeSet::from([w.f1]));
  assert!(ids(&snapshot, &Query::new().topic(w.france)).unwrap_err().is_not_found());
  assert!(ids(&snapshot, &Query::new().place("France")).unwrap_err().is_not_found());
  assert_eq!(snapshot.topics().topic(w.paris).unwrap().parents, BTreeSet::from([west]));
  snapshot.verify().unwrap();
}

#[test]
fn empty_merge_changes_nothing() {
  let w = europe();
  let west = w
    .kb
    .write(|tx| tx.create_topic(NewTopic::new("Western Europe", TopicKind::Place)))
    .unwrap();
  w.kb.write(|tx| tx.merge_topics(&BTreeSet::from([w.france]), west)).unwrap();
  let before = w.kb.snapshot().export();

  let report = w.kb.write(|tx| tx.merge_topics(&BTreeSet::new(), west)).unwrap();
  assert!(report.removed.is_empty() && report.retagged.is_empty());
  assert_eq!(w.kb.snapshot().export(), before);
}

#[test]
fn rejected_batch_keeps_the_committed_snapshot() {
  let w = europe();
  let before = w.kb.snapshot().export();
  let err = w
    .kb
    .write(|tx| tx.merge_topics(&BTreeSet::from([w.europe]), w.paris))
    .unwrap_err();
  assert!(matches!(err, Error::Cycle { .. }));
  assert_eq!(w.kb.snapshot().export(), before);
}

#[test]
fn split_honours_the_partition_policy() {
  let w = europe();
  let kb = KnowledgeBase::from_records(
    w.kb.snapshot().export(),
    Policy { require_full_partition: true, ..Policy::default() },
  )
  .unwrap();
  let f2 = kb
    .write(|tx| {
      tx.record_fact(NewFact::new("Paris syndrome").with_topic(w.paris).with_source(w.book_x))
    })
    .unwrap();

  let partial = SplitRequest::new(w.paris)
    .part(SplitPart::new("Paris (city)"))
    .assign(w.f1, "Paris (city)");
  let err = kb.write(|tx| tx.split_topic(&partial)).unwrap_err();
  assert!(matches!(err, Error::UnassignedFact { fact_id, .. } if fact_id == f2));

  let report = kb.write(|tx| tx.split_topic(&partial.clone().full_partition(false))).unwrap();
  let city = report.created[0];
  let snapshot = kb.snapshot();
  assert_eq!(snapshot.topics().topic(city).unwrap().parents, BTreeSet::from([w.france]));
  assert_eq!(ids(&snapshot, &Query::new().topic(w.france)).unwrap(), BTreeSet::from([w.f1, f2]));
  snapshot.verify().unwrap();
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[test]
fn export_import_preserves_state_and_index() {
  let w = europe();
  let snapshot = w.kb.snapshot();
  let records = snapshot.export();

  let json = serde_json::to_string(&records).unwrap();
  let decoded: Records = serde_json::from_str(&json).unwrap();
  assert_eq!(decoded, records);

  let imported = Snapshot::import(decoded).unwrap();
  assert_eq!(imported.index(), snapshot.index());
  assert_eq!(imported.index().digest(), snapshot.index().digest());
}

#[test]
fn import_rejects_dangling_references() {
  let w = europe();
  let mut records = w.kb.snapshot().export();
  records.sources.clear();
  let err = Snapshot::import(records).unwrap_err();
  assert!(matches!(err, Error::SourceNotFound(_)));
}

#[test]
fn import_rejects_dangling_topic_payloads() {
  let w = europe();
  let mut records = w.kb.snapshot().export();
  let ghost = TopicId::new();
  records.facts[0].payload.insert("attributed_to".into(), PayloadValue::Topic(ghost));
  let err = Snapshot::import(records).unwrap_err();
  assert!(matches!(err, Error::TopicNotFound(id) if id == ghost));
}

#[test]
fn describe_renders_context_and_payload() {
  let w = europe();
  let f = w
    .kb
    .write(|tx| {
      tx.record_fact(
        NewFact::new("Census of 1891")
          .with_context(w.paris)
          .with_attribute("population", PayloadValue::Number(2_447_957.0))
          .with_source(w.book_x),
      )
    })
    .unwrap();
  assert_eq!(
    w.kb.snapshot().describe(f).unwrap(),
    "Paris - Census of 1891 (population: 2447957)"
  );
}
