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

//! Ordered key-value storage primitives: the `StateStore` collaborator
//! (component consumed, not implemented, in production — `memory` is the
//! reference implementation used for tests), the write-through
//! [`cache::CachingKVStore`], and the `(time, metadata, key)` /
//! `(startMs, sizeMs, key)` byte encodings in [`key`].

pub mod cache;
pub mod error;
pub mod key;
pub mod memory;
pub mod store;

pub use cache::{CachingKVStore, KeyBytes, RangeFromIter, ValueBytes};
pub use error::{StorageError, StorageResult};
pub use key::{Metadata, Timer, TimeWindowed};
pub use memory::MemoryStateStore;
pub use store::{BoxStateStoreIter, StateStore, StateStoreIter};
