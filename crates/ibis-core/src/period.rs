//! Shared time periods.
//!
//! A [`Period`] is the stretch of time a claim is about (not when it was
//! recorded). Facts point at a period by id, so several facts can share one
//! and editing the period moves all of them at once. Periods are kept at day
//! precision.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  error::{Error, Result},
  id::PeriodId,
};

// ─── DateRange ───────────────────────────────────────────────────────────────

/// A span of calendar days. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
  pub start: Option<NaiveDate>,
  pub end:   Option<NaiveDate>,
}

impl DateRange {
  pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
    Self { start, end }
  }

  /// A single day.
  pub fn on(date: NaiveDate) -> Self { Self::new(Some(date), Some(date)) }

  pub fn validate(&self) -> Result<()> {
    if let (Some(start), Some(end)) = (self.start, self.end)
      && start > end
    {
      return Err(Error::invalid(format!("period starts ({start}) after it ends ({end})")));
    }
    Ok(())
  }

  /// Whether the two ranges share at least one day. Open ends are unbounded.
  pub fn overlaps(&self, other: &DateRange) -> bool {
    let starts_before_other_ends = match (self.start, other.end) {
      (Some(s), Some(e)) => s <= e,
      _ => true,
    };
    let ends_after_other_starts = match (self.end, other.start) {
      (Some(e), Some(s)) => e >= s,
      _ => true,
    };
    starts_before_other_ends && ends_after_other_starts
  }
}

// ─── Period ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
  pub period_id: PeriodId,
  pub span:      DateRange,
}

/// Owns every [`Period`]. Which facts use a period is tracked by
/// [`crate::fact_store::FactStore`].
#[derive(Debug, Clone, Default)]
pub struct PeriodRegistry {
  periods: BTreeMap<PeriodId, Period>,
}

impl PeriodRegistry {
  pub fn new() -> Self { Self::default() }

  pub fn from_records(records: impl IntoIterator<Item = Period>) -> Result<Self> {
    let mut registry = Self::new();
    for period in records {
      period.span.validate()?;
      let id = period.period_id;
      if registry.periods.insert(id, period).is_some() {
        return Err(Error::invalid(format!("duplicate period id {id}")));
      }
    }
    Ok(registry)
  }

  pub fn get(&self, id: PeriodId) -> Option<&Period> { self.periods.get(&id) }

  pub fn period(&self, id: PeriodId) -> Result<&Period> {
    self.periods.get(&id).ok_or(Error::PeriodNotFound(id))
  }

  pub fn contains(&self, id: PeriodId) -> bool { self.periods.contains_key(&id) }

  pub fn len(&self) -> usize { self.periods.len() }

  pub fn is_empty(&self) -> bool { self.periods.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Period> { self.periods.values() }

  pub(crate) fn create(&mut self, span: DateRange) -> Result<PeriodId> {
    span.validate()?;
    let period_id = PeriodId::new();
    debug!(%period_id, start = ?span.start, end = ?span.end, "created period");
    self.periods.insert(period_id, Period { period_id, span });
    Ok(period_id)
  }

  /// Move a period, returning its previous span.
  pub(crate) fn update(&mut self, id: PeriodId, span: DateRange) -> Result<DateRange> {
    span.validate()?;
    let period = self.periods.get_mut(&id).ok_or(Error::PeriodNotFound(id))?;
    Ok(std::mem::replace(&mut period.span, span))
  }

  pub(crate) fn remove(&mut self, id: PeriodId) -> Result<Period> {
    self.periods.remove(&id).ok_or(Error::PeriodNotFound(id))
  }
}
