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

//! Component D: watermark-driven firing of event-time timers (spec §4.D).
//! The heart of the design — see module-level docs in `spec.md` for the
//! range-scan rationale; this file just implements the state machine.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tw_storage::{CachingKVStore, Metadata, StateStore, Timer};

use crate::error::StreamResult;

/// Receives fired (or inline-fired) timer callbacks. Implemented by whatever
/// owns a `PersistentTimerStore` — here, `AggregatorTransformer`'s internal
/// event-timer handler.
///
/// Spec §5 describes `onTimer` as synchronous, but a timer callback that
/// scans the aggregate store necessarily awaits an async `StateStore`; this
/// trait is `async_trait` so that scan can happen inside the callback
/// itself rather than forcing an awkward two-phase collect-then-callback
/// split. `AsyncFlushCoordinator::on_flush` remains the only place bounded,
/// backpressured async work is batched and joined.
#[async_trait::async_trait]
pub trait TimerListener<K: Send>: Send {
    async fn on_timer(&mut self, time: i64, metadata: Metadata, key: K) -> StreamResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireExit {
    Exhausted,
    FoundTimerAfterWatermark,
    ExceededMaxTimers,
}

/// Bounded, watermark-driven, persisted one-shot timers (spec §4.D).
///
/// `next_timer_time` and `current_watermark` are plain owned fields, not
/// behind a `Mutex` or atomics: spec §5/§9 guarantee this store is only ever
/// touched from its owning task's thread.
pub struct PersistentTimerStore<K, S>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send,
    S: StateStore,
{
    store: CachingKVStore<Timer<K>, (), S>,
    next_timer_time: i64,
    current_watermark: i64,
    max_timer_fires_per_watermark: usize,
}

impl<K, S> PersistentTimerStore<K, S>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send,
    S: StateStore,
{
    pub fn new(store: S, max_timer_fires_per_watermark: usize) -> Self {
        Self {
            store: CachingKVStore::new(store),
            next_timer_time: i64::MAX,
            current_watermark: 0,
            max_timer_fires_per_watermark,
        }
    }

    pub fn next_timer_time(&self) -> i64 {
        self.next_timer_time
    }

    pub fn current_watermark(&self) -> i64 {
        self.current_watermark
    }

    /// Every currently-persisted timer, in key order. Used by callers that
    /// need to rebuild ephemeral derived state from the timer store on
    /// restart (spec §9).
    pub async fn all_timers(&self) -> StreamResult<Vec<Timer<K>>> {
        Ok(self.store.all().await?.into_iter().map(|(timer, ())| timer).collect())
    }

    /// Pushes buffered timer puts/deletes to the backing store. Exposed
    /// separately from `fire_timers`'s internal flush so a host can flush
    /// the timer store alongside its other state on its own commit
    /// boundary.
    pub async fn flush(&mut self) -> StreamResult<()> {
        self.store.flush_with(|_, ()| {}).await.map_err(Into::into)
    }

    /// spec §4.D `onInit`: reset scalars, then seed `next_timer_time` from
    /// whatever is already persisted (changelog replay on task restart).
    pub async fn on_init(&mut self) -> StreamResult<()> {
        self.next_timer_time = i64::MAX;
        self.current_watermark = 0;
        if let Some((first, _)) = self.store.all().await?.into_iter().next() {
            self.next_timer_time = first.time;
        }
        Ok(())
    }

    /// spec §4.D `addTimer`. If `time` has already passed the watermark, the
    /// callback fires inline, on this call stack, rather than being
    /// persisted — this is what keeps "no record past watermark" true even
    /// when a late timer registration would otherwise violate it.
    pub async fn add_timer(
        &mut self,
        time: i64,
        metadata: Metadata,
        key: K,
        listener: &mut impl TimerListener<K>,
    ) -> StreamResult<()> {
        if time < self.current_watermark {
            tracing::debug!(time, watermark = self.current_watermark, "inline-firing late timer add");
            return listener.on_timer(time, metadata, key).await;
        }
        self.store.put(Timer::new(time, metadata, key), ());
        if time < self.next_timer_time {
            self.next_timer_time = time;
        }
        Ok(())
    }

    /// spec §4.D `onWatermark`: fire due timers, then advance
    /// `current_watermark` last, so a timer callback that itself calls
    /// `add_timer` still observes the *old* watermark (the about-to-be-set
    /// one is the one that would make `time < currentWatermark` decide
    /// whether a nested `add_timer` fires inline).
    pub async fn on_watermark(&mut self, w: i64, listener: &mut impl TimerListener<K>) -> StreamResult<()> {
        if w >= self.next_timer_time {
            self.fire_timers(w, listener).await.inspect_err(|err| {
                tracing::error!(error = %err, "error propagated out of on_watermark");
            })?;
        }
        self.current_watermark = w;
        Ok(())
    }

    /// spec §4.D `fireTimers`.
    async fn fire_timers(&mut self, w: i64, listener: &mut impl TimerListener<K>) -> StreamResult<()> {
        self.fire_timers_inner(w, listener).await.inspect_err(|err| {
            tracing::error!(error = %err, "error propagated out of fire_timers");
        })
    }

    async fn fire_timers_inner(&mut self, w: i64, listener: &mut impl TimerListener<K>) -> StreamResult<()> {
        let from = Timer::<K>::time_prefix(self.next_timer_time);
        // `range_from` here is lazily pulled one entry at a time from the
        // backing store rather than collected up front — the whole point of
        // this scan is to stop as soon as a not-yet-due timer (or the fire
        // cap) is hit, without materializing whatever else is persisted
        // beyond it.
        let mut cursor = self.store.range_from(from).await?;

        let mut fires = 0usize;
        let mut exit = FireExit::Exhausted;
        let mut resume_at = None;

        for item in cursor.by_ref() {
            let (timer, ()) = item?;
            if w >= timer.time {
                tracing::debug!(time = timer.time, metadata = ?timer.metadata, "firing timer");
                listener.on_timer(timer.time, timer.metadata.clone(), timer.key.clone()).await?;
                self.store.delete_without_prior_value(timer);
                fires += 1;
                if fires >= self.max_timer_fires_per_watermark {
                    exit = FireExit::ExceededMaxTimers;
                    break;
                }
            } else {
                resume_at = Some(timer.time);
                exit = FireExit::FoundTimerAfterWatermark;
                break;
            }
        }

        // Flush the deletes of everything we actually fired before deciding
        // where the next scan should resume.
        self.store.flush_with(|_, _| {}).await?;

        match exit {
            FireExit::FoundTimerAfterWatermark => {
                self.next_timer_time = resume_at.expect("FoundTimerAfterWatermark always sets resume_at");
                tracing::debug!(next_timer_time = self.next_timer_time, "watermark exhausted due timers");
            }
            FireExit::ExceededMaxTimers => {
                tracing::trace!(fires, "max timer fires per watermark reached, yielding to next watermark");
                match cursor.next() {
                    Some(Ok((next, ()))) => self.next_timer_time = next.time,
                    Some(Err(e)) => return Err(e.into()),
                    None => self.next_timer_time = i64::MAX,
                }
            }
            FireExit::Exhausted => {
                self.next_timer_time = i64::MAX;
            }
        }

        Ok(())
    }
}
