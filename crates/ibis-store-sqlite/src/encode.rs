//! Conversion helpers between core types and SQLite column values.
//!
//! Ids are stored as hyphenated lowercase UUID text, timestamps as RFC 3339
//! UTC, calendar dates as `YYYY-MM-DD`. Sets and payloads are JSON.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};

use ibis_core::{
  fact::{Fact, PayloadValue},
  id::{FactId, SourceId, TopicId},
  period::{DateRange, Period},
  source::{Source, SourceKind},
  topic::{Topic, parse_kind},
};

use crate::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn decode_id<T: std::str::FromStr<Err = uuid::Error>>(s: &str) -> Result<T> {
  Ok(s.parse()?)
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

pub fn encode_date(date: NaiveDate) -> String { date.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

pub fn decode_source_kind(s: &str) -> Result<SourceKind> {
  s.parse()
    .map_err(|_| Error::UnknownKind { what: "source kind", value: s.to_owned() })
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Column values of one `topics` row, read inside the connection thread.
pub struct RawTopic {
  pub topic_id:    String,
  pub name:        String,
  pub kind:        String,
  pub description: String,
  pub aliases:     String,
  pub schema_keys: String,
}

impl RawTopic {
  pub fn encode(topic: &Topic) -> Result<Self> {
    Ok(Self {
      topic_id:    topic.topic_id.to_string(),
      name:        topic.name.clone(),
      kind:        topic.kind.as_str().to_owned(),
      description: topic.description.clone(),
      aliases:     serde_json::to_string(&topic.aliases)?,
      schema_keys: serde_json::to_string(&topic.schema)?,
    })
  }

  /// Parent links live in their own table and are attached by the caller.
  pub fn into_topic(self, parents: BTreeSet<TopicId>) -> Result<Topic> {
    Ok(Topic {
      topic_id: decode_id(&self.topic_id)?,
      name: self.name,
      kind: parse_kind(&self.kind),
      description: self.description,
      parents,
      aliases: serde_json::from_str(&self.aliases)?,
      schema: serde_json::from_str(&self.schema_keys)?,
    })
  }
}

pub struct RawSource {
  pub source_id: String,
  pub title:     String,
  pub authors:   String,
  pub publisher: Option<String>,
  pub published: Option<String>,
  pub accessed:  String,
  pub kind:      String,
  pub locator:   Option<String>,
}

impl RawSource {
  pub fn encode(source: &Source) -> Result<Self> {
    let kind: &'static str = source.kind.into();
    Ok(Self {
      source_id: source.source_id.to_string(),
      title:     source.title.clone(),
      authors:   serde_json::to_string(&source.authors)?,
      publisher: source.publisher.clone(),
      published: source.published.map(encode_date),
      accessed:  encode_dt(source.accessed),
      kind:      kind.to_owned(),
      locator:   source.locator.clone(),
    })
  }

  pub fn into_source(self) -> Result<Source> {
    Ok(Source {
      source_id: decode_id(&self.source_id)?,
      title:     self.title,
      authors:   serde_json::from_str(&self.authors)?,
      publisher: self.publisher,
      published: self.published.as_deref().map(decode_date).transpose()?,
      accessed:  decode_dt(&self.accessed)?,
      kind:      decode_source_kind(&self.kind)?,
      locator:   self.locator,
    })
  }
}

pub struct RawPeriod {
  pub period_id: String,
  pub starts_on: Option<String>,
  pub ends_on:   Option<String>,
}

impl RawPeriod {
  pub fn encode(period: &Period) -> Self {
    Self {
      period_id: period.period_id.to_string(),
      starts_on: period.span.start.map(encode_date),
      ends_on:   period.span.end.map(encode_date),
    }
  }

  pub fn into_period(self) -> Result<Period> {
    Ok(Period {
      period_id: decode_id(&self.period_id)?,
      span:      DateRange::new(
        self.starts_on.as_deref().map(decode_date).transpose()?,
        self.ends_on.as_deref().map(decode_date).transpose()?,
      ),
    })
  }
}

pub struct RawFact {
  pub fact_id:       String,
  pub statement:     String,
  pub payload:       String,
  pub context_id:    Option<String>,
  pub period_id:     Option<String>,
  pub restated_from: Option<String>,
  pub created_at:    String,
  pub modified_at:   String,
}

impl RawFact {
  pub fn encode(fact: &Fact) -> Result<Self> {
    Ok(Self {
      fact_id:       fact.fact_id.to_string(),
      statement:     fact.statement.clone(),
      payload:       serde_json::to_string(&fact.payload)?,
      context_id:    fact.context.map(|t| t.to_string()),
      period_id:     fact.period.map(|p| p.to_string()),
      restated_from: fact.restated_from.map(|f| f.to_string()),
      created_at:    encode_dt(fact.created_at),
      modified_at:   encode_dt(fact.modified_at),
    })
  }

  pub fn into_fact(
    self,
    topics: BTreeSet<TopicId>,
    sources: BTreeSet<SourceId>,
  ) -> Result<Fact> {
    let payload: BTreeMap<String, PayloadValue> = serde_json::from_str(&self.payload)?;
    Ok(Fact {
      fact_id: decode_id::<FactId>(&self.fact_id)?,
      statement: self.statement,
      payload,
      context: self.context_id.as_deref().map(decode_id).transpose()?,
      period: self.period_id.as_deref().map(decode_id).transpose()?,
      topics,
      sources,
      restated_from: self.restated_from.as_deref().map(decode_id).transpose()?,
      created_at: decode_dt(&self.created_at)?,
      modified_at: decode_dt(&self.modified_at)?,
    })
  }
}

/// Group `(owner, member)` link rows into per-owner sets.
pub fn group_links<K, V>(rows: Vec<(String, String)>) -> Result<BTreeMap<K, BTreeSet<V>>>
where
  K: Ord + std::str::FromStr<Err = uuid::Error>,
  V: Ord + std::str::FromStr<Err = uuid::Error>,
{
  let mut grouped: BTreeMap<K, BTreeSet<V>> = BTreeMap::new();
  for (owner, member) in rows {
    grouped.entry(decode_id(&owner)?).or_default().insert(decode_id(&member)?);
  }
  Ok(grouped)
}
