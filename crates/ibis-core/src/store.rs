//! The `SnapshotStore` trait.
//!
//! Persistence backends (e.g. `ibis-store-sqlite`) implement it; the core
//! itself never performs I/O. A backend stores the [`Records`] form of a
//! snapshot and hands it back unchanged.

use std::future::Future;

use crate::snapshot::Records;

/// Abstraction over a persistence backend for whole-snapshot load and save.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait SnapshotStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the stored records. A fresh store yields empty records.
  fn load(&self) -> impl Future<Output = Result<Records, Self::Error>> + Send + '_;

  /// Replace the stored state with `records`, atomically.
  fn save<'a>(
    &'a self,
    records: &'a Records,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
