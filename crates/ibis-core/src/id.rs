//! Stable identifiers for topics, sources, periods and facts.
//!
//! Each id is a v4 UUID wrapped in its own newtype so the id spaces
//! cannot be mixed up. Ids order by their UUID bytes, which gives every
//! `BTreeMap`/`BTreeSet` keyed by them a deterministic iteration order.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
      Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub Uuid);

    impl $name {
      /// Create a new random id.
      pub fn new() -> Self { Self(Uuid::new_v4()) }

      pub fn as_uuid(&self) -> Uuid { self.0 }
    }

    impl Default for $name {
      fn default() -> Self { Self::new() }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl From<Uuid> for $name {
      fn from(id: Uuid) -> Self { Self(id) }
    }

    impl FromStr for $name {
      type Err = uuid::Error;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
      }
    }
  };
}

id_type!(
  /// Identifies a topic (tag) in the hierarchy.
  TopicId
);
id_type!(
  /// Identifies a source record.
  SourceId
);
id_type!(
  /// Identifies a shared time period.
  PeriodId
);
id_type!(
  /// Identifies a fact.
  FactId
);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_parse_from_their_display_form() {
    let id = TopicId::new();
    let parsed: TopicId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
  }

  #[test]
  fn ids_serialize_as_plain_uuid_strings() {
    let id = FactId(Uuid::nil());
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
  }
}
