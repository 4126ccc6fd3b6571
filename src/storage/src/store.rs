// Copyright 2026 Tumblewatch Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The ordered key-value collaborator consumed by everything in this crate.
//!
//! `StateStore` is the opaque-`Bytes` interface described in spec §6: a single
//! implementation is expected to back both the aggregate store and the timer
//! store of an `AggregatorTransformer`, each under its own logical namespace.
//! Production deployments are expected to back this with an LSM engine; the
//! `memory` module provides a `BTreeMap`-backed implementation for tests.

use std::ops::Bound;

use bytes::Bytes;

use crate::error::StorageResult;

pub type KeyRange = (Bound<Bytes>, Bound<Bytes>);

/// A scoped iterator over a key range.
///
/// Implementers must release any underlying resource (an LSM snapshot, a
/// cursor) no later than when the iterator is dropped — this is the `close()`
/// half of spec §6's `Iterator` collaborator, expressed as RAII instead of an
/// explicit method so that every exit path, including an early `?`, releases
/// it.
pub trait StateStoreIter: Iterator<Item = (Bytes, Bytes)> + Send {}

impl<T> StateStoreIter for T where T: Iterator<Item = (Bytes, Bytes)> + Send {}

pub type BoxStateStoreIter = Box<dyn StateStoreIter>;

/// Ordered KV interface over opaque bytes (spec §6, "State store (consumed)").
#[async_trait::async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    async fn put(&self, key: Bytes, value: Bytes) -> StorageResult<()>;

    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// `[from, to)`: `from` inclusive, `to` exclusive.
    async fn range(&self, from: Bytes, to: Bytes) -> StorageResult<BoxStateStoreIter>;

    /// `[from, +inf)`. This is what `PersistentTimerStore::fire_timers`
    /// scans with (spec §4.D: "Open a range scan starting at
    /// `timeToPrefix(nextTimerTime)`" with no upper bound — the watermark
    /// comparison inside the scan loop is what stops it).
    async fn range_from(&self, from: Bytes) -> StorageResult<BoxStateStoreIter>;

    async fn all(&self) -> StorageResult<BoxStateStoreIter>;

    /// Bulk delete `[from, to)` without requiring the caller to read prior
    /// values first. On an LSM-backed store this is a single range
    /// tombstone rather than N point tombstones.
    async fn delete_range(&self, from: Bytes, to: Bytes) -> StorageResult<()>;
}
