//! [`SqliteStore`], the SQLite implementation of [`SnapshotStore`].

use std::path::Path;

use ibis_core::{
  Records,
  id::{FactId, SourceId, TopicId},
  store::SnapshotStore,
};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawFact, RawPeriod, RawSource, RawTopic, decode_id, group_links},
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Ibis snapshot store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    let version: i64 = self
      .conn
      .call(|conn| {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
          return Ok(version);
        }
        conn.execute_batch(SCHEMA)?;
        if version == 0 {
          conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(SCHEMA_VERSION)
      })
      .await?;
    if version != SCHEMA_VERSION {
      return Err(Error::SchemaVersion(version));
    }
    Ok(())
  }
}

/// Everything read from the database in one pass, still undecoded.
struct RawRecords {
  topics:       Vec<RawTopic>,
  parents:      Vec<(String, String)>,
  sources:      Vec<RawSource>,
  periods:      Vec<RawPeriod>,
  facts:        Vec<RawFact>,
  fact_topics:  Vec<(String, String)>,
  fact_sources: Vec<(String, String)>,
}

impl RawRecords {
  fn encode(records: &Records) -> Result<Self> {
    let mut parents = Vec::new();
    for topic in &records.topics {
      for parent in &topic.parents {
        parents.push((topic.topic_id.to_string(), parent.to_string()));
      }
    }
    let mut fact_topics = Vec::new();
    let mut fact_sources = Vec::new();
    for fact in &records.facts {
      let id = fact.fact_id.to_string();
      fact_topics.extend(fact.topics.iter().map(|t| (id.clone(), t.to_string())));
      fact_sources.extend(fact.sources.iter().map(|s| (id.clone(), s.to_string())));
    }
    Ok(Self {
      topics: records.topics.iter().map(RawTopic::encode).collect::<Result<_>>()?,
      parents,
      sources: records.sources.iter().map(RawSource::encode).collect::<Result<_>>()?,
      periods: records.periods.iter().map(RawPeriod::encode).collect(),
      facts: records.facts.iter().map(RawFact::encode).collect::<Result<_>>()?,
      fact_topics,
      fact_sources,
    })
  }

  fn decode(self) -> Result<Records> {
    let mut parents = group_links::<TopicId, TopicId>(self.parents)?;
    let mut fact_topics = group_links::<FactId, TopicId>(self.fact_topics)?;
    let mut fact_sources = group_links::<FactId, SourceId>(self.fact_sources)?;

    let topics = self
      .topics
      .into_iter()
      .map(|raw| {
        let id: TopicId = decode_id(&raw.topic_id)?;
        raw.into_topic(parents.remove(&id).unwrap_or_default())
      })
      .collect::<Result<_>>()?;
    let sources = self.sources.into_iter().map(RawSource::into_source).collect::<Result<_>>()?;
    let periods = self.periods.into_iter().map(RawPeriod::into_period).collect::<Result<_>>()?;
    let facts = self
      .facts
      .into_iter()
      .map(|raw| {
        let id: FactId = decode_id(&raw.fact_id)?;
        raw.into_fact(
          fact_topics.remove(&id).unwrap_or_default(),
          fact_sources.remove(&id).unwrap_or_default(),
        )
      })
      .collect::<Result<_>>()?;
    Ok(Records { topics, sources, periods, facts })
  }
}

fn pairs(
  conn: &rusqlite::Connection,
  sql: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
  let mut stmt = conn.prepare(sql)?;
  stmt
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()
}

// ─── SnapshotStore impl ──────────────────────────────────────────────────────

impl SnapshotStore for SqliteStore {
  type Error = Error;

  async fn load(&self) -> Result<Records> {
    let raw = self
      .conn
      .call(|conn| {
        let topics = {
          let mut stmt = conn.prepare(
            "SELECT topic_id, name, kind, description, aliases, schema_keys
             FROM topics ORDER BY topic_id",
          )?;
          stmt
            .query_map([], |row| {
              Ok(RawTopic {
                topic_id:    row.get(0)?,
                name:        row.get(1)?,
                kind:        row.get(2)?,
                description: row.get(3)?,
                aliases:     row.get(4)?,
                schema_keys: row.get(5)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let sources = {
          let mut stmt = conn.prepare(
            "SELECT source_id, title, authors, publisher, published, accessed, kind, locator
             FROM sources ORDER BY source_id",
          )?;
          stmt
            .query_map([], |row| {
              Ok(RawSource {
                source_id: row.get(0)?,
                title:     row.get(1)?,
                authors:   row.get(2)?,
                publisher: row.get(3)?,
                published: row.get(4)?,
                accessed:  row.get(5)?,
                kind:      row.get(6)?,
                locator:   row.get(7)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let periods = {
          let mut stmt = conn.prepare(
            "SELECT period_id, starts_on, ends_on FROM periods ORDER BY period_id",
          )?;
          stmt
            .query_map([], |row| {
              Ok(RawPeriod {
                period_id: row.get(0)?,
                starts_on: row.get(1)?,
                ends_on:   row.get(2)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let facts = {
          let mut stmt = conn.prepare(
            "SELECT fact_id, statement, payload, context_id, period_id, restated_from,
                    created_at, modified_at
             FROM facts ORDER BY fact_id",
          )?;
          stmt
            .query_map([], |row| {
              Ok(RawFact {
                fact_id:       row.get(0)?,
                statement:     row.get(1)?,
                payload:       row.get(2)?,
                context_id:    row.get(3)?,
                period_id:     row.get(4)?,
                restated_from: row.get(5)?,
                created_at:    row.get(6)?,
                modified_at:   row.get(7)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(RawRecords {
          topics,
          parents: pairs(conn, "SELECT child_id, parent_id FROM topic_parents")?,
          sources,
          periods,
          facts,
          fact_topics: pairs(conn, "SELECT fact_id, topic_id FROM fact_topics")?,
          fact_sources: pairs(conn, "SELECT fact_id, source_id FROM fact_sources")?,
        })
      })
      .await?;

    let records = raw.decode()?;
    debug!(
      topics = records.topics.len(),
      sources = records.sources.len(),
      periods = records.periods.len(),
      facts = records.facts.len(),
      "loaded snapshot"
    );
    Ok(records)
  }

  async fn save<'a>(&'a self, records: &'a Records) -> Result<()> {
    let raw = RawRecords::encode(records)?;
    let counts = (raw.topics.len(), raw.sources.len(), raw.periods.len(), raw.facts.len());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(
          "DELETE FROM fact_sources;
           DELETE FROM fact_topics;
           DELETE FROM facts;
           DELETE FROM periods;
           DELETE FROM sources;
           DELETE FROM topic_parents;
           DELETE FROM topics;",
        )?;

        {
          let mut stmt = tx.prepare(
            "INSERT INTO topics (topic_id, name, kind, description, aliases, schema_keys)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for t in &raw.topics {
            stmt.execute(rusqlite::params![
              t.topic_id,
              t.name,
              t.kind,
              t.description,
              t.aliases,
              t.schema_keys
            ])?;
          }
          let mut stmt =
            tx.prepare("INSERT INTO topic_parents (child_id, parent_id) VALUES (?1, ?2)")?;
          for (child, parent) in &raw.parents {
            stmt.execute(rusqlite::params![child, parent])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO sources
               (source_id, title, authors, publisher, published, accessed, kind, locator)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for s in &raw.sources {
            stmt.execute(rusqlite::params![
              s.source_id,
              s.title,
              s.authors,
              s.publisher,
              s.published,
              s.accessed,
              s.kind,
              s.locator
            ])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO periods (period_id, starts_on, ends_on) VALUES (?1, ?2, ?3)",
          )?;
          for p in &raw.periods {
            stmt.execute(rusqlite::params![p.period_id, p.starts_on, p.ends_on])?;
          }

          let mut stmt = tx.prepare(
            "INSERT INTO facts
               (fact_id, statement, payload, context_id, period_id, restated_from,
                created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for f in &raw.facts {
            stmt.execute(rusqlite::params![
              f.fact_id,
              f.statement,
              f.payload,
              f.context_id,
              f.period_id,
              f.restated_from,
              f.created_at,
              f.modified_at
            ])?;
          }
          let mut stmt =
            tx.prepare("INSERT INTO fact_topics (fact_id, topic_id) VALUES (?1, ?2)")?;
          for (fact, topic) in &raw.fact_topics {
            stmt.execute(rusqlite::params![fact, topic])?;
          }
          let mut stmt =
            tx.prepare("INSERT INTO fact_sources (fact_id, source_id) VALUES (?1, ?2)")?;
          for (fact, source) in &raw.fact_sources {
            stmt.execute(rusqlite::params![fact, source])?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    debug!(
      topics = counts.0,
      sources = counts.1,
      periods = counts.2,
      facts = counts.3,
      "saved snapshot"
    );
    Ok(())
  }
}
