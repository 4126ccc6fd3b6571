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

//! Component C: per-task watermark tracking (spec §4.C).

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet, VecDeque};
use std::hash::Hash;

/// When the watermark advances and listeners fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionPolicy {
    /// The watermark advances (and listeners fire) on every record.
    PerMessage,
    /// The watermark only advances when [`WatermarkTracker::punctuate`] is
    /// called, driven by the host's scheduled wall-clock punctuation.
    AtInterval,
}

/// Below this, a just-initialized watermark is assumed to still be
/// bootstrapping (spec §9 open question). Purely a logging threshold — it
/// never gates firing.
const BOOTSTRAP_WARN_THRESHOLD_MS: i64 = 10_000;

/// Maintains `currentWatermark` for one task (spec §3, §4.C).
///
/// `allowed_out_of_orderness` corresponds to the `allowedOutOfOrderness`
/// parameter used to derive a watermark candidate from each record's event
/// time: `candidate = recordEventTime - allowedOutOfOrderness`.
pub struct WatermarkTracker {
    policy: EmissionPolicy,
    current: i64,
    pending: i64,
    allowed_out_of_orderness: i64,
    listeners: Vec<Box<dyn FnMut(i64) + Send>>,
}

impl WatermarkTracker {
    pub fn new(policy: EmissionPolicy, allowed_out_of_orderness: i64) -> Self {
        Self {
            policy,
            current: 0,
            pending: 0,
            allowed_out_of_orderness,
            listeners: Vec::new(),
        }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn register_listener(&mut self, listener: impl FnMut(i64) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Folds one record's event time into the watermark. Under
    /// `EmissionPolicy::PerMessage` this may advance `current` and fire
    /// listeners immediately; under `AtInterval` it only updates the pending
    /// candidate, applied at the next [`Self::punctuate`].
    pub fn on_record(&mut self, event_time: i64) -> i64 {
        let candidate = (event_time - self.allowed_out_of_orderness).max(self.current);
        self.pending = self.pending.max(candidate);
        if self.policy == EmissionPolicy::PerMessage {
            self.publish(candidate);
        }
        self.current
    }

    /// A scheduled wall-clock tick (spec §6: `schedulePunctuation(..,
    /// WallClock, ..)`). A no-op under `EmissionPolicy::PerMessage`.
    pub fn punctuate(&mut self) -> i64 {
        if self.policy == EmissionPolicy::AtInterval {
            let candidate = self.pending;
            self.publish(candidate);
        }
        self.current
    }

    fn publish(&mut self, candidate: i64) {
        if candidate <= self.current {
            return;
        }
        self.current = candidate;
        if self.current < BOOTSTRAP_WARN_THRESHOLD_MS {
            tracing::warn!(
                watermark = self.current,
                "watermark below {BOOTSTRAP_WARN_THRESHOLD_MS}ms; assuming bootstrap"
            );
        }
        for listener in &mut self.listeners {
            listener(self.current);
        }
    }
}

#[derive(Default)]
struct StagedWatermarks {
    in_heap: bool,
    staged: VecDeque<i64>,
}

/// Merges per-upstream watermarks into a single task-level watermark by
/// taking the minimum across sources. Buffers out-of-order arrivals per
/// source so a fast source doesn't race ahead of a slow one in the heap.
pub struct BufferedWatermarks<ID> {
    lowest_per_source: BinaryHeap<Reverse<(i64, ID)>>,
    staged_per_source: BTreeMap<ID, StagedWatermarks>,
}

impl<ID: Ord + Hash + Clone> BufferedWatermarks<ID> {
    pub fn with_sources(sources: Vec<ID>) -> Self {
        Self {
            lowest_per_source: BinaryHeap::with_capacity(sources.len()),
            staged_per_source: sources.into_iter().map(|id| (id, StagedWatermarks::default())).collect(),
        }
    }

    /// Records a new watermark from `source`. Returns the watermark to
    /// publish (the new task-level minimum) if the merged watermark advanced.
    pub fn handle_watermark(&mut self, source: ID, watermark: i64) -> Option<i64> {
        let staged = self
            .staged_per_source
            .get_mut(&source)
            .expect("watermark from unregistered source");
        if staged.in_heap {
            staged.staged.push_back(watermark);
            None
        } else {
            staged.in_heap = true;
            self.lowest_per_source.push(Reverse((watermark, source)));
            self.advance()
        }
    }

    fn advance(&mut self) -> Option<i64> {
        let total_sources = self.staged_per_source.len();
        let mut advanced_to = None;
        while !self.lowest_per_source.is_empty()
            && (self.lowest_per_source.len() == total_sources
                || advanced_to.is_some_and(|w| w == self.lowest_per_source.peek().unwrap().0 .0))
        {
            let Reverse((watermark, source)) = self.lowest_per_source.pop().unwrap();
            advanced_to = Some(watermark);
            let staged = self.staged_per_source.get_mut(&source).unwrap();
            if let Some(next) = staged.staged.pop_front() {
                self.lowest_per_source.push(Reverse((next, source)));
            } else {
                staged.in_heap = false;
            }
        }
        advanced_to
    }

    pub fn remove_sources(&mut self, sources: &HashSet<ID>) -> Option<i64> {
        self.lowest_per_source.retain(|Reverse((_, id))| !sources.contains(id));
        self.staged_per_source.retain(|id, _| !sources.contains(id));
        self.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_message_advances_immediately() {
        let mut tracker = WatermarkTracker::new(EmissionPolicy::PerMessage, 0);
        assert_eq!(tracker.on_record(100), 100);
        assert_eq!(tracker.current(), 100);
    }

    #[test]
    fn watermark_never_regresses() {
        let mut tracker = WatermarkTracker::new(EmissionPolicy::PerMessage, 0);
        tracker.on_record(100);
        tracker.on_record(50);
        assert_eq!(tracker.current(), 100);
    }

    #[test]
    fn allowed_out_of_orderness_is_subtracted() {
        let mut tracker = WatermarkTracker::new(EmissionPolicy::PerMessage, 10);
        tracker.on_record(100);
        assert_eq!(tracker.current(), 90);
    }

    #[test]
    fn at_interval_only_advances_on_punctuate() {
        let mut tracker = WatermarkTracker::new(EmissionPolicy::AtInterval, 0);
        tracker.on_record(100);
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.punctuate(), 100);
    }

    #[test]
    fn listeners_fire_on_advance() {
        let mut tracker = WatermarkTracker::new(EmissionPolicy::PerMessage, 0);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        tracker.register_listener(move |w| seen2.lock().unwrap().push(w));
        tracker.on_record(10);
        tracker.on_record(5);
        tracker.on_record(20);
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn multi_source_merge_emits_minimum() {
        let mut merged = BufferedWatermarks::with_sources(vec!["a", "b"]);
        assert_eq!(merged.handle_watermark("a", 100), None);
        assert_eq!(merged.handle_watermark("b", 50), Some(50));
        assert_eq!(merged.handle_watermark("a", 200), None);
        assert_eq!(merged.handle_watermark("b", 150), Some(150));
    }
}
