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

//! An in-process `StateStore` backed by a `BTreeMap`, for tests and for
//! running the transformer without a real LSM engine. Range scans are served
//! in batches copied out from under the lock rather than held open across the
//! whole iteration, so a long-lived timer-store scan never blocks writers for
//! its full duration.

use std::collections::BTreeMap;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::Arc;

use bytes::Bytes;
use itertools::Itertools;
use parking_lot::RwLock;

use crate::error::StorageResult;
use crate::store::{BoxStateStoreIter, StateStore};

mod batched_iter {
    use super::*;

    /// Iterates a range of a locked `BTreeMap` in fixed-size batches, trading
    /// a little copying for not holding the lock across the entire scan.
    ///
    /// This is not a consistent snapshot: concurrent writes that land inside
    /// the not-yet-fetched tail of the range will be observed. Within this
    /// crate every store is owned by a single task, so that's never visible.
    pub struct Iter {
        inner: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
        range: (Bound<Bytes>, Bound<Bytes>),
        current: std::vec::IntoIter<(Bytes, Bytes)>,
    }

    impl Iter {
        pub fn new(inner: Arc<RwLock<BTreeMap<Bytes, Bytes>>>, range: (Bound<Bytes>, Bound<Bytes>)) -> Self {
            Self {
                inner,
                range,
                current: Vec::new().into_iter(),
            }
        }

        const BATCH_SIZE: usize = 256;

        fn refill(&mut self) {
            debug_assert!(self.current.len() == 0);
            let batch: Vec<(Bytes, Bytes)> = self
                .inner
                .read()
                .range((self.range.0.clone(), self.range.1.clone()))
                .take(Self::BATCH_SIZE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect_vec();
            if let Some((last_key, _)) = batch.last() {
                self.range.0 = Excluded(last_key.clone());
            }
            self.current = batch.into_iter();
        }
    }

    impl Iterator for Iter {
        type Item = (Bytes, Bytes);

        fn next(&mut self) -> Option<Self::Item> {
            match self.current.next() {
                Some(item) => Some(item),
                None => {
                    self.refill();
                    self.current.next()
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<BTreeMap<Bytes, Bytes>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn put(&self, key: Bytes, value: Bytes) -> StorageResult<()> {
        self.inner.write().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    async fn range(&self, from: Bytes, to: Bytes) -> StorageResult<BoxStateStoreIter> {
        Ok(Box::new(batched_iter::Iter::new(
            self.inner.clone(),
            (Included(from), Bound::Excluded(to)),
        )))
    }

    async fn range_from(&self, from: Bytes) -> StorageResult<BoxStateStoreIter> {
        Ok(Box::new(batched_iter::Iter::new(self.inner.clone(), (Included(from), Unbounded))))
    }

    async fn all(&self) -> StorageResult<BoxStateStoreIter> {
        Ok(Box::new(batched_iter::Iter::new(self.inner.clone(), (Unbounded, Unbounded))))
    }

    async fn delete_range(&self, from: Bytes, to: Bytes) -> StorageResult<()> {
        let mut guard = self.inner.write();
        let keys: Vec<Bytes> = guard
            .range((Included(from), Bound::Excluded(to)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            guard.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn range_respects_bounds() {
        let store = MemoryStateStore::new();
        for i in 0u8..10 {
            store.put(Bytes::from(vec![i]), Bytes::from(vec![i])).await.unwrap();
        }
        let mut iter = store.range(Bytes::from(vec![3]), Bytes::from(vec![6])).await.unwrap();
        let got: Vec<u8> = iter.by_ref().map(|(k, _)| k[0]).collect();
        assert_eq!(got, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn delete_range_is_bulk_and_exclusive_upper() {
        let store = MemoryStateStore::new();
        for i in 0u8..5 {
            store.put(Bytes::from(vec![i]), Bytes::from(vec![i])).await.unwrap();
        }
        store.delete_range(Bytes::from(vec![1]), Bytes::from(vec![4])).await.unwrap();
        let remaining: Vec<u8> = store.all().await.unwrap().map(|(k, _)| k[0]).collect();
        assert_eq!(remaining, vec![0, 4]);
    }

    #[tokio::test]
    async fn get_put_delete_round_trip() {
        let store = MemoryStateStore::new();
        assert_eq!(store.get(b"k").await.unwrap(), None);
        store.put(Bytes::from_static(b"k"), Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(Bytes::from_static(b"v")));
        store.delete(b"k").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }
}
