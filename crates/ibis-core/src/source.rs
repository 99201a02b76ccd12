//! Sources (the publications facts are drawn from) and the
//! [`SourceRegistry`] that owns them.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  error::{Error, Result},
  fact_store::FactStore,
  id::{FactId, SourceId},
};

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceKind {
  #[default]
  Book,
  Article,
  Journal,
  Website,
  Video,
  Interview,
  Other,
}

// ─── Source ──────────────────────────────────────────────────────────────────

/// A publication one or more facts are drawn from. Sources never own facts;
/// facts cite sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub source_id: SourceId,
  pub title:     String,
  #[serde(default)]
  pub authors:   Vec<String>,
  pub publisher: Option<String>,
  pub published: Option<NaiveDate>,
  /// When the reader consulted the source.
  pub accessed:  DateTime<Utc>,
  pub kind:      SourceKind,
  /// Page, chapter, URL, timestamp… whatever locates the material.
  pub locator:   Option<String>,
}

impl fmt::Display for Source {
  /// `Title, by A and B (1889-03-31)`, omitting the parts that are unknown.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.title)?;
    if !self.authors.is_empty() {
      write!(f, ", by {}", self.authors.join(" and "))?;
    }
    if let Some(published) = self.published {
      write!(f, " ({})", published.format("%Y-%m-%d"))?;
    }
    Ok(())
  }
}

// ─── NewSource ───────────────────────────────────────────────────────────────

/// Input to [`SourceRegistry::create`] and [`SourceRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct NewSource {
  pub title:     String,
  pub authors:   Vec<String>,
  pub publisher: Option<String>,
  pub published: Option<NaiveDate>,
  /// Defaults to the time of registration.
  pub accessed:  Option<DateTime<Utc>>,
  pub kind:      SourceKind,
  pub locator:   Option<String>,
}

impl NewSource {
  pub fn new(title: impl Into<String>, kind: SourceKind) -> Self {
    Self { title: title.into(), kind, ..Self::default() }
  }

  pub fn with_author(mut self, author: impl Into<String>) -> Self {
    self.authors.push(author.into());
    self
  }

  pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
    self.publisher = Some(publisher.into());
    self
  }

  pub fn published_on(mut self, date: NaiveDate) -> Self {
    self.published = Some(date);
    self
  }

  pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
    self.locator = Some(locator.into());
    self
  }

  fn validate(&self) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(Error::invalid("sources need a title"));
    }
    if self.authors.iter().any(|a| a.trim().is_empty()) {
      return Err(Error::invalid("author names must not be empty"));
    }
    Ok(())
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Owns every [`Source`]. No deduplication is attempted: registering the same
/// book twice yields two sources.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
  sources: BTreeMap<SourceId, Source>,
}

impl SourceRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn from_records(records: impl IntoIterator<Item = Source>) -> Result<Self> {
    let mut registry = Self::new();
    for source in records {
      let id = source.source_id;
      if registry.sources.insert(id, source).is_some() {
        return Err(Error::invalid(format!("duplicate source id {id}")));
      }
    }
    Ok(registry)
  }

  pub fn get(&self, id: SourceId) -> Option<&Source> { self.sources.get(&id) }

  pub fn source(&self, id: SourceId) -> Result<&Source> {
    self.sources.get(&id).ok_or(Error::SourceNotFound(id))
  }

  pub fn contains(&self, id: SourceId) -> bool { self.sources.contains_key(&id) }

  pub fn len(&self) -> usize { self.sources.len() }

  pub fn is_empty(&self) -> bool { self.sources.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Source> { self.sources.values() }

  pub fn create(&mut self, input: NewSource) -> Result<SourceId> {
    input.validate()?;
    let source_id = SourceId::new();
    let source = Source {
      source_id,
      title: input.title.trim().to_owned(),
      authors: input.authors.iter().map(|a| a.trim().to_owned()).collect(),
      publisher: input.publisher,
      published: input.published,
      accessed: input.accessed.unwrap_or_else(Utc::now),
      kind: input.kind,
      locator: input.locator,
    };
    debug!(%source_id, title = %source.title, "registered source");
    self.sources.insert(source_id, source);
    Ok(source_id)
  }

  /// Replace a source's metadata, keeping its id. An unset `accessed` keeps
  /// the previous value.
  pub fn update(&mut self, id: SourceId, input: NewSource) -> Result<()> {
    input.validate()?;
    let Some(source) = self.sources.get_mut(&id) else {
      return Err(Error::SourceNotFound(id));
    };
    source.title = input.title.trim().to_owned();
    source.authors = input.authors.iter().map(|a| a.trim().to_owned()).collect();
    source.publisher = input.publisher;
    source.published = input.published;
    if let Some(accessed) = input.accessed {
      source.accessed = accessed;
    }
    source.kind = input.kind;
    source.locator = input.locator;
    Ok(())
  }

  /// Delete a source no fact cites any more.
  pub fn delete(&mut self, id: SourceId, facts: &FactStore) -> Result<Source> {
    self.source(id)?;
    let citing = facts.citing(id).count();
    if citing > 0 {
      return Err(Error::SourceReferenced { source_id: id, facts: citing });
    }
    debug!(source_id = %id, "deleted source");
    self.sources.remove(&id).ok_or(Error::SourceNotFound(id))
  }

  /// The deduplicated sources behind `fact_ids`, in order of first citation:
  /// facts are visited in the given order and each fact's sources in id
  /// order. This is the bibliography of an article composed from the facts.
  pub fn sources_for_facts(
    &self,
    fact_ids: impl IntoIterator<Item = FactId>,
    facts: &FactStore,
  ) -> Result<Vec<&Source>> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for fact_id in fact_ids {
      for source_id in &facts.fact(fact_id)?.sources {
        if seen.insert(*source_id) {
          out.push(self.source(*source_id)?);
        }
      }
    }
    Ok(out)
  }
}
