//! SQLite backend for the Ibis knowledge base.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The whole snapshot is written in one
//! SQLite transaction and read back in one pass.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
