//! SQL schema for the Ibis SQLite store.
//!
//! Executed at every connection startup. The layout is versioned through
//! `PRAGMA user_version`; a file carrying any other version is refused.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS topics (
    topic_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,             -- 'person' | 'place' | ... | custom
    description TEXT NOT NULL DEFAULT '',
    aliases     TEXT NOT NULL DEFAULT '[]', -- JSON array of strings
    schema_keys TEXT NOT NULL DEFAULT '[]'  -- JSON array of strings
);

CREATE TABLE IF NOT EXISTS topic_parents (
    child_id  TEXT NOT NULL REFERENCES topics(topic_id),
    parent_id TEXT NOT NULL REFERENCES topics(topic_id),
    PRIMARY KEY (child_id, parent_id),
    CHECK (child_id != parent_id)
);

CREATE TABLE IF NOT EXISTS sources (
    source_id TEXT PRIMARY KEY,
    title     TEXT NOT NULL,
    authors   TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    publisher TEXT,
    published TEXT,                        -- YYYY-MM-DD or NULL
    accessed  TEXT NOT NULL,               -- ISO 8601 UTC
    kind      TEXT NOT NULL,
    locator   TEXT
);

CREATE TABLE IF NOT EXISTS periods (
    period_id TEXT PRIMARY KEY,
    starts_on TEXT,                        -- YYYY-MM-DD or NULL (open)
    ends_on   TEXT,                        -- YYYY-MM-DD or NULL (open)
    CHECK (starts_on IS NULL OR ends_on IS NULL OR starts_on <= ends_on)
);

CREATE TABLE IF NOT EXISTS facts (
    fact_id       TEXT PRIMARY KEY,
    statement     TEXT NOT NULL,
    payload       TEXT NOT NULL DEFAULT '{}', -- JSON object of typed values
    context_id    TEXT REFERENCES topics(topic_id),
    period_id     TEXT REFERENCES periods(period_id),
    restated_from TEXT REFERENCES facts(fact_id) DEFERRABLE INITIALLY DEFERRED,
    created_at    TEXT NOT NULL,
    modified_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fact_topics (
    fact_id  TEXT NOT NULL REFERENCES facts(fact_id),
    topic_id TEXT NOT NULL REFERENCES topics(topic_id),
    PRIMARY KEY (fact_id, topic_id)
);

CREATE TABLE IF NOT EXISTS fact_sources (
    fact_id   TEXT NOT NULL REFERENCES facts(fact_id),
    source_id TEXT NOT NULL REFERENCES sources(source_id),
    PRIMARY KEY (fact_id, source_id)
);

CREATE INDEX IF NOT EXISTS fact_topics_topic_idx   ON fact_topics(topic_id);
CREATE INDEX IF NOT EXISTS fact_sources_source_idx ON fact_sources(source_id);
CREATE INDEX IF NOT EXISTS facts_created_idx       ON facts(created_at);
CREATE INDEX IF NOT EXISTS facts_period_idx        ON facts(period_id);
";
