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

//! Component B: a write-through typed cache in front of a `StateStore`.
//!
//! Reads see buffered writes immediately; buffered writes are only pushed to
//! the backing store on [`CachingKVStore::flush`]/[`CachingKVStore::flush_with`],
//! which the host calls from its commit callback. Because there is exactly one
//! layer of buffering here, the value handed to the flush listener *is*
//! already the post-flush canonical value — there is nothing to re-read,
//! which resolves spec §9's open question about what the listener should see
//! in favor of "post-flush canonical" without an extra store round-trip.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};
use crate::key::{Timer, TimeWindowed};
use crate::store::{BoxStateStoreIter, StateStore};

/// A typed key that knows how to encode itself into the byte layout a
/// `StateStore` understands.
pub trait KeyBytes: Ord + Clone {
    fn to_bytes(&self) -> StorageResult<Bytes>;
    fn from_bytes(bytes: &[u8]) -> StorageResult<Self>;
}

impl<K: Serialize + DeserializeOwned + Clone + Ord> KeyBytes for Timer<K> {
    fn to_bytes(&self) -> StorageResult<Bytes> {
        Timer::to_bytes(self)
    }

    fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        Timer::from_bytes(bytes)
    }
}

impl<K: Serialize + DeserializeOwned + Clone + Ord> KeyBytes for TimeWindowed<K> {
    fn to_bytes(&self) -> StorageResult<Bytes> {
        TimeWindowed::to_bytes(self)
    }

    fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        TimeWindowed::from_bytes(bytes)
    }
}

/// A typed value, serialized with `bincode` — values don't need
/// order-preserving encoding, only round-tripping.
pub trait ValueBytes: Clone {
    fn to_bytes(&self) -> StorageResult<Bytes>;
    fn from_bytes(bytes: &[u8]) -> StorageResult<Self>;
}

impl<T: Serialize + DeserializeOwned + Clone> ValueBytes for T {
    fn to_bytes(&self) -> StorageResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Clone)]
enum DirtyOp<V> {
    Put(V),
    Delete,
}

pub struct CachingKVStore<K: KeyBytes, V: ValueBytes, S: StateStore> {
    store: S,
    dirty: BTreeMap<K, DirtyOp<V>>,
    flush_listener: Option<Box<dyn FnMut(&K, &V) + Send>>,
}

impl<K: KeyBytes, V: ValueBytes, S: StateStore> CachingKVStore<K, V, S> {
    pub fn new(store: S) -> Self {
        Self { store, dirty: BTreeMap::new(), flush_listener: None }
    }

    pub async fn get(&self, key: &K) -> StorageResult<Option<V>> {
        if let Some(op) = self.dirty.get(key) {
            return Ok(match op {
                DirtyOp::Put(v) => Some(v.clone()),
                DirtyOp::Delete => None,
            });
        }
        match self.store.get(&key.to_bytes()?).await? {
            Some(bytes) => Ok(Some(V::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn get_or_default(&self, key: &K, default: impl FnOnce() -> V) -> StorageResult<V> {
        Ok(self.get(key).await?.unwrap_or_else(default))
    }

    pub fn put(&mut self, key: K, value: V) {
        self.dirty.insert(key, DirtyOp::Put(value));
    }

    /// spec §4.B `deleteWithoutPriorValue`: mark a delete without reading the
    /// prior value first.
    pub fn delete_without_prior_value(&mut self, key: K) {
        self.dirty.insert(key, DirtyOp::Delete);
    }

    /// Merges the cache and the backing store over `[from, to)`, cache taking
    /// precedence (spec §4.B: "`range` MUST merge cache and store contents in
    /// key order").
    pub async fn range(&self, from: Bytes, to: Bytes) -> StorageResult<Vec<(K, V)>> {
        let mut merged: BTreeMap<K, V> = BTreeMap::new();
        let mut iter = self.store.range(from.clone(), to.clone()).await?;
        for (key_bytes, value_bytes) in iter.by_ref() {
            let key = K::from_bytes(&key_bytes)?;
            if self.dirty.contains_key(&key) {
                continue;
            }
            merged.insert(key, V::from_bytes(&value_bytes)?);
        }
        for (key, op) in &self.dirty {
            let key_bytes = key.to_bytes()?;
            if key_bytes < from || key_bytes >= to {
                continue;
            }
            match op {
                DirtyOp::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                DirtyOp::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Like [`Self::range`] but with no upper bound — and, unlike `range`,
    /// returned lazily. A caller like `PersistentTimerStore::fire_timers`
    /// scans from a low watermark towards potentially-unbounded future
    /// timers and must stop pulling the moment it hits one not yet due;
    /// collecting the whole tail into a `Vec` first would defeat that. The
    /// dirty overlay is small (bounded by outstanding unflushed writes, not
    /// by store size) so it's cloned up front; the backing store's
    /// `BoxStateStoreIter` is pulled one entry at a time and dropped,
    /// un-drained, as soon as the caller stops asking for more.
    pub async fn range_from(&self, from: Bytes) -> StorageResult<RangeFromIter<K, V>> {
        let store_iter = self.store.range_from(from.clone()).await?;
        let mut overlay = Vec::new();
        for (key, op) in &self.dirty {
            if key.to_bytes()? < from {
                continue;
            }
            overlay.push((key.clone(), op.clone()));
        }
        Ok(RangeFromIter { store_iter, store_peek: None, overlay: overlay.into_iter(), overlay_peek: None })
    }

    pub async fn all(&self) -> StorageResult<Vec<(K, V)>> {
        let mut merged: BTreeMap<K, V> = BTreeMap::new();
        let mut iter = self.store.all().await?;
        for (key_bytes, value_bytes) in iter.by_ref() {
            let key = K::from_bytes(&key_bytes)?;
            if self.dirty.contains_key(&key) {
                continue;
            }
            merged.insert(key, V::from_bytes(&value_bytes)?);
        }
        for (key, op) in &self.dirty {
            match op {
                DirtyOp::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                DirtyOp::Delete => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// spec §4.B `deleteRangeWithoutChangelog`: a bulk delete issued straight
    /// to the backing store, bypassing the dirty buffer (and therefore the
    /// flush listener) entirely. Used by window expiry, where the timer
    /// itself is the idempotent replay mechanism — individual deletions don't
    /// need to be replayed too.
    pub async fn delete_range_without_changelog(&mut self, from: Bytes, to: Bytes) -> StorageResult<()> {
        let mut shadowed = Vec::new();
        for key in self.dirty.keys() {
            let key_bytes = key.to_bytes()?;
            if key_bytes >= from && key_bytes < to {
                shadowed.push(key.clone());
            }
        }
        for key in shadowed {
            self.dirty.remove(&key);
        }
        self.store.delete_range(from, to).await
    }

    pub fn register_flush_listener(&mut self, listener: impl FnMut(&K, &V) + Send + 'static) {
        self.flush_listener = Some(Box::new(listener));
    }

    /// Flushes using whatever listener was registered via
    /// [`Self::register_flush_listener`], if any.
    pub async fn flush(&mut self) -> StorageResult<()> {
        let mut listener = self.flush_listener.take();
        let result = self
            .flush_with(|key, value| {
                if let Some(l) = listener.as_mut() {
                    l(key, value);
                }
            })
            .await;
        self.flush_listener = listener;
        result
    }

    /// Flushes with a one-off listener supplied for this call. Used by
    /// callers (like `AggregatorTransformer`) whose listener needs to borrow
    /// per-call state — a `ProcessorContext`, a watermark snapshot — that
    /// can't be captured into a `'static` closure ahead of time.
    pub async fn flush_with(&mut self, mut on_dirty: impl FnMut(&K, &V)) -> StorageResult<()> {
        let dirty = std::mem::take(&mut self.dirty);
        for (key, op) in dirty {
            match op {
                DirtyOp::Put(value) => {
                    on_dirty(&key, &value);
                    self.store.put(key.to_bytes()?, value.to_bytes()?).await?;
                }
                DirtyOp::Delete => {
                    self.store.delete(&key.to_bytes()?).await?;
                }
            }
        }
        Ok(())
    }
}

/// Lazy merge of [`CachingKVStore`]'s dirty overlay with a backing-store
/// `range_from` scan, cache taking precedence on key collision. Yields in key
/// order; decode errors surface as `Err` at the position they occur rather
/// than failing the whole scan up front.
pub struct RangeFromIter<K: KeyBytes, V: ValueBytes> {
    store_iter: BoxStateStoreIter,
    store_peek: Option<(K, V)>,
    overlay: std::vec::IntoIter<(K, DirtyOp<V>)>,
    overlay_peek: Option<(K, DirtyOp<V>)>,
}

impl<K: KeyBytes, V: ValueBytes> RangeFromIter<K, V> {
    /// Pulls one more entry from the backing store iterator into
    /// `store_peek`, if it's empty. Returns `Some(Err(..))` on a decode
    /// failure, leaving `store_peek` empty.
    fn fill_store_peek(&mut self) -> Option<StorageError> {
        if self.store_peek.is_some() {
            return None;
        }
        let (key_bytes, value_bytes) = self.store_iter.next()?;
        match K::from_bytes(&key_bytes).and_then(|k| V::from_bytes(&value_bytes).map(|v| (k, v))) {
            Ok(kv) => {
                self.store_peek = Some(kv);
                None
            }
            Err(e) => Some(e),
        }
    }
}

impl<K: KeyBytes, V: ValueBytes> Iterator for RangeFromIter<K, V> {
    type Item = StorageResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(err) = self.fill_store_peek() {
                return Some(Err(err));
            }
            if self.overlay_peek.is_none() {
                self.overlay_peek = self.overlay.next();
            }

            let take_store = match (&self.store_peek, &self.overlay_peek) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some((sk, _)), Some((ok, _))) => sk.cmp(ok) == Ordering::Less,
            };

            if take_store {
                let (k, v) = self.store_peek.take().expect("checked Some above");
                return Some(Ok((k, v)));
            }

            let (ok, op) = match self.overlay_peek.take() {
                Some(pair) => pair,
                None => return None,
            };
            if let Some((sk, _)) = &self.store_peek {
                if *sk == ok {
                    self.store_peek = None;
                }
            }
            match op {
                DirtyOp::Put(v) => return Some(Ok((ok, v))),
                DirtyOp::Delete => continue,
            }
        }
    }
}
