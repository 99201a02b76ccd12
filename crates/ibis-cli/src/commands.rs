//! Subcommands and their execution against a [`KnowledgeBase`].

use std::collections::BTreeSet;

use anyhow::{Context as _, bail};
use clap::{Args, Subcommand};
use ibis_core::{
  KnowledgeBase, Snapshot,
  batch::{SplitPart, SplitRequest},
  fact::NewFact,
  period::DateRange,
  id::{FactId, PeriodId, SourceId, TopicId},
  query::{AttributeFilter, MatchMode, Query},
  source::{NewSource, SourceKind},
  topic::{NewTopic, parse_kind},
};
use serde_json::{Value, json};

use crate::parse;

// ─── Command tree ─────────────────────────────────────────────────────────────

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create, link and inspect topics.
  #[command(subcommand)]
  Topic(TopicCommand),
  /// Register and remove sources.
  #[command(subcommand)]
  Source(SourceCommand),
  /// Record and edit facts.
  #[command(subcommand)]
  Fact(FactCommand),
  /// Manage the shared periods facts take place in.
  #[command(subcommand)]
  Period(PeriodCommand),
  /// Recall facts by topic, attribute and date.
  Query(QueryArgs),
  /// Deduplicated sources cited by the given facts.
  Bibliography {
    #[arg(required = true)]
    facts: Vec<FactId>,
  },
  /// Fold topics into a target, retagging their facts.
  Merge {
    target:  String,
    #[arg(required = true)]
    sources: Vec<String>,
  },
  /// Partition a topic's facts into new topics.
  Split(SplitArgs),
  /// Check the search index against a full rebuild.
  Verify,
}

#[derive(Subcommand, Debug)]
pub enum TopicCommand {
  Add {
    name:        String,
    #[arg(long, default_value = "generic")]
    kind:        String,
    #[arg(long = "parent")]
    parents:     Vec<String>,
    #[arg(long = "alias")]
    aliases:     Vec<String>,
    /// Attribute keys facts in this context may carry.
    #[arg(long = "schema")]
    schema:      Vec<String>,
    #[arg(long, default_value = "")]
    description: String,
  },
  Link {
    child:  String,
    parent: String,
  },
  Unlink {
    child:          String,
    parent:         String,
    /// Refuse to remove the last parent, whatever the configured policy.
    #[arg(long)]
    require_rooted: bool,
  },
  Alias {
    topic:  String,
    alias:  String,
    #[arg(long)]
    remove: bool,
  },
  Show {
    topic: String,
  },
  List,
  Delete {
    topic: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum SourceCommand {
  Add {
    title:     String,
    #[arg(long, default_value = "book")]
    kind:      SourceKind,
    #[arg(long = "author")]
    authors:   Vec<String>,
    #[arg(long)]
    publisher: Option<String>,
    /// Publication date, YYYY-MM-DD.
    #[arg(long)]
    published: Option<String>,
    /// URL, ISBN or shelf mark.
    #[arg(long)]
    locator:   Option<String>,
  },
  Delete {
    source: SourceId,
  },
}

#[derive(Subcommand, Debug)]
pub enum FactCommand {
  Record {
    statement: String,
    #[arg(long = "topic")]
    topics:    Vec<String>,
    #[arg(long = "source", required = true)]
    sources:   Vec<SourceId>,
    #[arg(long)]
    context:   Option<String>,
    /// Payload attribute as key=value.
    #[arg(long = "set")]
    payload:   Vec<String>,
    /// Dates for a new period owned by this fact.
    #[command(flatten)]
    dates:     DateArgs,
    /// An existing period to share.
    #[arg(long, conflicts_with_all = ["on", "from", "to"])]
    period:    Option<PeriodId>,
    #[arg(long)]
    restates:  Option<FactId>,
  },
  Show {
    fact: FactId,
  },
  Tag {
    fact:  FactId,
    topic: String,
  },
  Untag {
    fact:  FactId,
    topic: String,
  },
  Cite {
    fact:   FactId,
    source: SourceId,
  },
  Uncite {
    fact:   FactId,
    source: SourceId,
  },
  /// Set (or with `--unset`, remove) a payload attribute.
  Set {
    fact:  FactId,
    key:   String,
    value: Option<String>,
    #[arg(long, conflicts_with = "value")]
    unset: bool,
  },
  /// Place a fact in a period, or with no `--period` make it undated.
  Schedule {
    fact:   FactId,
    #[arg(long)]
    period: Option<PeriodId>,
  },
  Delete {
    fact: FactId,
  },
}

#[derive(Subcommand, Debug)]
pub enum PeriodCommand {
  Add {
    #[command(flatten)]
    dates: DateArgs,
  },
  /// Move a period and every fact in it.
  Update {
    period: PeriodId,
    #[command(flatten)]
    dates:  DateArgs,
  },
  /// Delete a period; its facts become undated.
  Delete {
    period: PeriodId,
  },
  List,
}

#[derive(Args, Debug, Default)]
pub struct DateArgs {
  /// A single day.
  #[arg(long)]
  on:   Option<String>,
  #[arg(long)]
  from: Option<String>,
  #[arg(long)]
  to:   Option<String>,
}

impl DateArgs {
  fn range(&self) -> anyhow::Result<Option<DateRange>> {
    parse::date_range(self.on.as_deref(), self.from.as_deref(), self.to.as_deref())
  }
}

#[derive(Args, Debug)]
pub struct QueryArgs {
  #[arg(long = "topic")]
  topics:   Vec<String>,
  #[arg(long = "person")]
  people:   Vec<String>,
  #[arg(long = "place")]
  places:   Vec<String>,
  /// Attribute present with any value.
  #[arg(long = "has")]
  has:      Vec<String>,
  /// Attribute equal to a value, as key=value.
  #[arg(long = "eq")]
  equals:   Vec<String>,
  /// Attribute lower bound, as key=value.
  #[arg(long = "min")]
  minimum:  Vec<String>,
  /// Attribute upper bound, as key=value.
  #[arg(long = "max")]
  maximum:  Vec<String>,
  #[command(flatten)]
  dates:    DateArgs,
  /// Require every topic and attribute filter instead of any.
  #[arg(long)]
  all:      bool,
  /// Print rendered statements instead of ids.
  #[arg(long)]
  describe: bool,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
  topic:          String,
  /// Name of a new topic; repeat for each part.
  #[arg(long = "part", required = true)]
  parts:          Vec<String>,
  /// Fact placement as fact-id=part-name.
  #[arg(long = "assign")]
  assignments:    Vec<String>,
  /// Drop the original topic from facts left unassigned.
  #[arg(long)]
  retire:         bool,
  /// Require every tagged fact to be assigned.
  #[arg(long)]
  full_partition: Option<bool>,
}

// ─── Execution ────────────────────────────────────────────────────────────────

/// What a command printed and whether the snapshot must be saved.
pub struct Outcome {
  pub output:  Value,
  pub changed: bool,
}

impl Outcome {
  fn read(output: Value) -> Self { Self { output, changed: false } }

  fn wrote(output: Value) -> Self { Self { output, changed: true } }
}

pub fn run(kb: &KnowledgeBase, command: Command) -> anyhow::Result<Outcome> {
  match command {
    Command::Topic(cmd) => topic(kb, cmd),
    Command::Source(cmd) => source(kb, cmd),
    Command::Fact(cmd) => fact(kb, cmd),
    Command::Period(cmd) => period(kb, cmd),
    Command::Query(args) => query(kb, &args),
    Command::Bibliography { facts } => {
      let snapshot = kb.snapshot();
      let sources = snapshot.sources_for_facts(facts)?;
      Ok(Outcome::read(json!(sources)))
    }
    Command::Merge { target, sources } => {
      let report = kb.write(|tx| {
        let graph = tx.snapshot().topics();
        let target = parse::topic_selector(&target).resolve(graph)?;
        let sources = sources
          .iter()
          .map(|s| parse::topic_selector(s).resolve(graph))
          .collect::<ibis_core::Result<BTreeSet<TopicId>>>()?;
        tx.merge_topics(&sources, target)
      })?;
      Ok(Outcome::wrote(json!(report)))
    }
    Command::Split(args) => split(kb, args),
    Command::Verify => {
      let snapshot = kb.snapshot();
      snapshot.verify()?;
      Ok(Outcome::read(json!({
        "facts": snapshot.facts().len(),
        "digest": snapshot.index().digest(),
      })))
    }
  }
}

fn topic(kb: &KnowledgeBase, cmd: TopicCommand) -> anyhow::Result<Outcome> {
  match cmd {
    TopicCommand::Add { name, kind, parents, aliases, schema, description } => {
      let id = kb.write(|tx| {
        let graph = tx.snapshot().topics();
        let parents = parents
          .iter()
          .map(|p| parse::topic_selector(p).resolve(graph))
          .collect::<ibis_core::Result<Vec<_>>>()?;
        let mut input = NewTopic::new(name, parse_kind(&kind))
          .with_parents(parents)
          .with_description(description);
        for alias in aliases {
          input = input.with_alias(alias);
        }
        for key in schema {
          input = input.with_schema_key(key);
        }
        tx.create_topic(input)
      })?;
      Ok(Outcome::wrote(json!({ "topic_id": id })))
    }
    TopicCommand::Link { child, parent } => {
      let added = kb.write(|tx| {
        let (child, parent) = resolve_pair(tx.snapshot(), &child, &parent)?;
        tx.add_parent(child, parent)
      })?;
      Ok(Outcome::wrote(json!({ "changed": added })))
    }
    TopicCommand::Unlink { child, parent, require_rooted } => {
      let removed = kb.write(|tx| {
        let (child, parent) = resolve_pair(tx.snapshot(), &child, &parent)?;
        if require_rooted {
          tx.remove_parent_with(child, parent, true)
        } else {
          tx.remove_parent(child, parent)
        }
      })?;
      Ok(Outcome::wrote(json!({ "changed": removed })))
    }
    TopicCommand::Alias { topic, alias, remove } => {
      let changed = kb.write(|tx| {
        let id = parse::topic_selector(&topic).resolve(tx.snapshot().topics())?;
        if remove { tx.remove_alias(id, &alias) } else { tx.add_alias(id, &alias) }
      })?;
      Ok(Outcome::wrote(json!({ "changed": changed })))
    }
    TopicCommand::Show { topic } => {
      let snapshot = kb.snapshot();
      let graph = snapshot.topics();
      let id = parse::topic_selector(&topic).resolve(graph)?;
      let record = graph.topic(id)?;
      let children: Vec<TopicId> = graph.children_of(id).collect();
      let facts = snapshot.facts().referencing(id);
      Ok(Outcome::read(json!({
        "topic": record,
        "children": children,
        "facts": facts,
      })))
    }
    TopicCommand::List => {
      let snapshot = kb.snapshot();
      let topics: Vec<Value> = snapshot
        .topics()
        .iter()
        .map(|t| json!({ "topic_id": t.topic_id, "name": t.name, "kind": t.kind }))
        .collect();
      Ok(Outcome::read(Value::Array(topics)))
    }
    TopicCommand::Delete { topic } => {
      let removed = kb.write(|tx| {
        let id = parse::topic_selector(&topic).resolve(tx.snapshot().topics())?;
        tx.delete_topic(id)
      })?;
      Ok(Outcome::wrote(json!(removed)))
    }
  }
}

fn resolve_pair(
  snapshot: &Snapshot,
  child: &str,
  parent: &str,
) -> ibis_core::Result<(TopicId, TopicId)> {
  let graph = snapshot.topics();
  Ok((
    parse::topic_selector(child).resolve(graph)?,
    parse::topic_selector(parent).resolve(graph)?,
  ))
}

fn source(kb: &KnowledgeBase, cmd: SourceCommand) -> anyhow::Result<Outcome> {
  match cmd {
    SourceCommand::Add { title, kind, authors, publisher, published, locator } => {
      let mut input = NewSource::new(title, kind);
      input.authors = authors;
      input.publisher = publisher;
      input.published = published.as_deref().map(parse::date).transpose()?;
      input.locator = locator;
      let id = kb.write(|tx| tx.create_source(input))?;
      Ok(Outcome::wrote(json!({ "source_id": id })))
    }
    SourceCommand::Delete { source } => {
      let removed = kb.write(|tx| tx.delete_source(source))?;
      Ok(Outcome::wrote(json!(removed)))
    }
  }
}

fn fact(kb: &KnowledgeBase, cmd: FactCommand) -> anyhow::Result<Outcome> {
  match cmd {
    FactCommand::Record {
      statement,
      topics,
      sources,
      context,
      payload,
      dates,
      period,
      restates,
    } => {
      let span = dates.range()?;
      let snapshot = kb.snapshot();
      let graph = snapshot.topics();

      let mut input = NewFact::new(statement).with_sources(sources);
      for t in &topics {
        input = input.with_topic(parse::topic_selector(t).resolve(graph)?);
      }
      if let Some(context) = context {
        input = input.with_context(parse::topic_selector(&context).resolve(graph)?);
      }
      for entry in &payload {
        let (key, value) = parse::assignment(entry)?;
        input = input.with_attribute(key, parse::value(value, graph)?);
      }
      if let Some(period) = period {
        input = input.with_period(period);
      }
      if let Some(earlier) = restates {
        input = input.restating(earlier);
      }

      let id = kb.write(|tx| {
        let input = match span {
          Some(span) => input.with_period(tx.create_period(span)?),
          None => input,
        };
        tx.record_fact(input)
      })?;
      Ok(Outcome::wrote(json!({ "fact_id": id })))
    }
    FactCommand::Show { fact } => {
      let snapshot = kb.snapshot();
      let record = snapshot.facts().fact(fact)?;
      let restatements: Vec<FactId> = snapshot.facts().restatements(fact).collect();
      Ok(Outcome::read(json!({
        "fact": record,
        "described": snapshot.describe(fact)?,
        "restatements": restatements,
      })))
    }
    FactCommand::Tag { fact, topic } => {
      let changed = kb.write(|tx| {
        let id = parse::topic_selector(&topic).resolve(tx.snapshot().topics())?;
        tx.add_topic(fact, id)
      })?;
      Ok(Outcome::wrote(json!({ "changed": changed })))
    }
    FactCommand::Untag { fact, topic } => {
      let changed = kb.write(|tx| {
        let id = parse::topic_selector(&topic).resolve(tx.snapshot().topics())?;
        tx.remove_topic(fact, id)
      })?;
      Ok(Outcome::wrote(json!({ "changed": changed })))
    }
    FactCommand::Cite { fact, source } => {
      let changed = kb.write(|tx| tx.add_source(fact, source))?;
      Ok(Outcome::wrote(json!({ "changed": changed })))
    }
    FactCommand::Uncite { fact, source } => {
      let changed = kb.write(|tx| tx.remove_source(fact, source))?;
      Ok(Outcome::wrote(json!({ "changed": changed })))
    }
    FactCommand::Set { fact, key, value, unset } => {
      let previous = if unset {
        kb.write(|tx| tx.remove_payload(fact, &key))?
      } else {
        let Some(raw) = value else { bail!("a value is required unless --unset is given") };
        let value = parse::value(&raw, kb.snapshot().topics())?;
        kb.write(|tx| tx.set_payload(fact, &key, value))?
      };
      Ok(Outcome::wrote(json!({ "previous": previous })))
    }
    FactCommand::Schedule { fact, period } => {
      kb.write(|tx| tx.set_period(fact, period))?;
      Ok(Outcome::wrote(json!({ "fact_id": fact, "period_id": period })))
    }
    FactCommand::Delete { fact } => {
      kb.write(|tx| tx.delete_fact(fact))?;
      Ok(Outcome::wrote(json!({ "deleted": fact })))
    }
  }
}

fn period(kb: &KnowledgeBase, cmd: PeriodCommand) -> anyhow::Result<Outcome> {
  match cmd {
    PeriodCommand::Add { dates } => {
      let span = dates.range()?.unwrap_or_default();
      let id = kb.write(|tx| tx.create_period(span))?;
      Ok(Outcome::wrote(json!({ "period_id": id })))
    }
    PeriodCommand::Update { period, dates } => {
      let Some(span) = dates.range()? else { bail!("give --on, or --from and/or --to") };
      kb.write(|tx| tx.update_period(period, span))?;
      let moved: Vec<FactId> = kb.snapshot().facts().scheduled_in(period).collect();
      Ok(Outcome::wrote(json!({ "period_id": period, "facts": moved })))
    }
    PeriodCommand::Delete { period } => {
      let removed = kb.write(|tx| tx.delete_period(period))?;
      Ok(Outcome::wrote(json!(removed)))
    }
    PeriodCommand::List => {
      let snapshot = kb.snapshot();
      let periods: Vec<Value> = snapshot
        .periods()
        .iter()
        .map(|p| {
          let facts: Vec<FactId> = snapshot.facts().scheduled_in(p.period_id).collect();
          json!({ "period_id": p.period_id, "span": p.span, "facts": facts })
        })
        .collect();
      Ok(Outcome::read(Value::Array(periods)))
    }
  }
}

fn query(kb: &KnowledgeBase, args: &QueryArgs) -> anyhow::Result<Outcome> {
  let snapshot = kb.snapshot();
  let graph = snapshot.topics();

  let mut q = Query::new().mode(if args.all { MatchMode::All } else { MatchMode::Any });
  for t in &args.topics {
    q = q.topic(parse::topic_selector(t));
  }
  for name in &args.people {
    q = q.person(name.as_str());
  }
  for name in &args.places {
    q = q.place(name.as_str());
  }
  for key in &args.has {
    q = q.attribute(AttributeFilter::Exists(key.clone()));
  }
  for entry in &args.equals {
    let (key, value) = parse::assignment(entry)?;
    q = q.equals(key, parse::value(value, graph)?);
  }
  for entry in &args.minimum {
    let (key, value) = parse::assignment(entry)?;
    q = q.between(key, Some(parse::value(value, graph)?), None);
  }
  for entry in &args.maximum {
    let (key, value) = parse::assignment(entry)?;
    q = q.between(key, None, Some(parse::value(value, graph)?));
  }
  if let Some(range) = args.dates.range()? {
    q = q.during(range);
  }

  let hits = snapshot.query(&q).context("query failed")?;
  let output = if args.describe {
    let lines = hits
      .iter()
      .map(|id| snapshot.describe(id))
      .collect::<ibis_core::Result<Vec<_>>>()?;
    json!(lines)
  } else {
    json!(hits.to_vec())
  };
  Ok(Outcome::read(output))
}

fn split(kb: &KnowledgeBase, args: SplitArgs) -> anyhow::Result<Outcome> {
  let mut assignments = Vec::with_capacity(args.assignments.len());
  for entry in &args.assignments {
    let (fact, part) = parse::assignment(entry)?;
    let fact: FactId = fact.parse().with_context(|| format!("not a fact id: {fact:?}"))?;
    assignments.push((fact, part));
  }

  let report = kb.write(|tx| {
    let topic = parse::topic_selector(&args.topic).resolve(tx.snapshot().topics())?;
    let mut request = SplitRequest::new(topic);
    for part in &args.parts {
      request = request.part(SplitPart::new(part));
    }
    for (fact, part) in &assignments {
      request = request.assign(*fact, *part);
    }
    if args.retire {
      request = request.retire_original();
    }
    if let Some(required) = args.full_partition {
      request = request.full_partition(required);
    }
    tx.split_topic(&request)
  })?;
  Ok(Outcome::wrote(json!(report)))
}
