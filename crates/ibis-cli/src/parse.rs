//! Parsers for command-line values.

use anyhow::{Context as _, bail};
use chrono::NaiveDate;
use ibis_core::{
  fact::PayloadValue,
  graph::TopicGraph,
  id::TopicId,
  period::DateRange,
  query::TopicSelector,
  topic::TopicKind,
};

/// A topic named on the command line: a UUID, `kind:name` for a built-in
/// kind, or a bare name or alias.
pub fn topic_selector(s: &str) -> TopicSelector {
  if let Ok(id) = s.parse::<TopicId>() {
    return TopicSelector::Id(id);
  }
  if let Some((prefix, name)) = s.split_once(':')
    && let Ok(kind) = prefix.parse::<TopicKind>()
    && !matches!(kind, TopicKind::Custom(_))
  {
    return TopicSelector::Typed(kind, name.to_owned());
  }
  TopicSelector::Name(s.to_owned())
}

pub fn date(s: &str) -> anyhow::Result<NaiveDate> {
  NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
    .with_context(|| format!("expected a YYYY-MM-DD date, got {s:?}"))
}

/// `--on`, or `--from` and `--to` with either end left open. `None` when no
/// flag is given.
pub fn date_range(
  on: Option<&str>,
  from: Option<&str>,
  to: Option<&str>,
) -> anyhow::Result<Option<DateRange>> {
  match (on, from, to) {
    (Some(_), Some(_), _) | (Some(_), _, Some(_)) => bail!("--on excludes --from and --to"),
    (Some(day), None, None) => Ok(Some(DateRange::on(date(day)?))),
    (None, None, None) => Ok(None),
    (None, from, to) => Ok(Some(DateRange::new(
      from.map(date).transpose()?,
      to.map(date).transpose()?,
    ))),
  }
}

/// Split `key=value`.
pub fn assignment(s: &str) -> anyhow::Result<(&str, &str)> {
  match s.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
    _ => bail!("expected key=value, got {s:?}"),
  }
}

/// Payload values are typed by shape: numbers, then ISO dates, then
/// `topic:<ref>` references, otherwise text.
pub fn value(s: &str, graph: &TopicGraph) -> anyhow::Result<PayloadValue> {
  let trimmed = s.trim();
  if let Ok(n) = trimmed.parse::<f64>()
    && n.is_finite()
  {
    return Ok(PayloadValue::Number(n));
  }
  if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
    return Ok(PayloadValue::Date(d));
  }
  if let Some(reference) = trimmed.strip_prefix("topic:") {
    let id = topic_selector(reference).resolve(graph)?;
    return Ok(PayloadValue::Topic(id));
  }
  Ok(PayloadValue::Text(s.to_owned()))
}
