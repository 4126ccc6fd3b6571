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

//! The runtime collaborator consumed by `AggregatorTransformer` (spec §6
//! "Runtime collaborator (consumed)"). The host streaming runtime —
//! partitioning, record delivery, topology, changelog replication — is out
//! of scope (spec §1); this trait is the seam through which the core talks
//! to it.

use tw_storage::Metadata;

/// `forward`, `commitCallback`, and `schedulePunctuation` from spec §6,
/// parameterized over the downstream key/value types a transformer emits.
pub trait ProcessorContext<Kout, Vout> {
    /// Emit a record downstream at the given event timestamp.
    fn forward(&mut self, key: Kout, value: Vout, timestamp: i64);

    /// The watermark observed at the moment of the current callback.
    fn current_watermark(&self) -> i64;
}

/// A result-carrying windowed emission (spec §3 `WindowedValue[V]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultState {
    WindowOpen,
    WindowClosed,
    Restatement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedValue<V> {
    pub result_state: ResultState,
    pub value: V,
}

impl<V> WindowedValue<V> {
    pub fn new(result_state: ResultState, value: V) -> Self {
        Self { result_state, value }
    }
}

/// Timer metadata a user can register through `AggregatorTransformer`'s
/// timer collaborator — re-exported here so callers building a
/// `ProcessorContext` don't need to depend on `tw-storage` directly.
pub type TimerMetadata = Metadata;

/// A `Vec`-collecting [`ProcessorContext`] for tests: records every
/// `forward` call in arrival order and reports a fixed watermark — an
/// in-memory recorder standing in for a real host runtime, rather than a
/// mock framework.
#[derive(Default)]
pub struct RecordingContext<Kout, Vout> {
    pub forwarded: Vec<(Kout, Vout, i64)>,
    pub watermark: i64,
}

impl<Kout, Vout> RecordingContext<Kout, Vout> {
    pub fn new() -> Self {
        Self { forwarded: Vec::new(), watermark: 0 }
    }

    pub fn set_watermark(&mut self, watermark: i64) {
        self.watermark = watermark;
    }
}

impl<Kout, Vout> ProcessorContext<Kout, Vout> for RecordingContext<Kout, Vout> {
    fn forward(&mut self, key: Kout, value: Vout, timestamp: i64) {
        self.forwarded.push((key, value, timestamp));
    }

    fn current_watermark(&self) -> i64 {
        self.watermark
    }
}
