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

//! Component F: tumbling-window aggregation with close/expire/restatement
//! semantics (spec §4.F) — the transformer that ties components A-E
//! together.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tw_storage::{CachingKVStore, Metadata, StateStore, TimeWindowed};

use crate::config::WindowAggregationConfig;
use crate::context::{ProcessorContext, ResultState, WindowedValue};
use crate::error::{StreamError, StreamResult};
use crate::timer_store::{PersistentTimerStore, TimerListener};

/// User-supplied aggregation logic: `initializer()` seeds a fresh
/// accumulator, `aggregate` folds one `(key, value)` into it. Both are
/// fallible — a failure here is a `StreamError::UserCallback` (spec §7
/// `UserCallbackError`), fatal to the task.
pub trait Aggregator<K, V, A> {
    fn initializer(&self) -> anyhow::Result<A>;
    fn aggregate(&self, key: &K, value: V, acc: A) -> anyhow::Result<A>;
}

/// Counters named in spec §7 ("observational, not recovery mechanisms").
/// Not wired into any metrics sink here — that's out of scope per spec §1 —
/// but exposed as a plain snapshot so a host can forward them to whatever
/// it uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub num_restatements: u64,
    pub closed_windows: u64,
    pub expired_windows: u64,
    pub emit_early: u64,
}

type CustomWindowStart<K, V> = Box<dyn Fn(i64, &K, &V) -> i64 + Send>;

/// Tumbling-window aggregation over event time (spec §4.F).
///
/// Holds two independently-namespaced `StateStore` instances — an
/// aggregate store and a timer store (spec §6 "Persisted state layout":
/// "two stores per transformer instance") — plus the ephemeral
/// `nonExpiredWindowStartTimes` dedup set (spec §3, §9: rebuildable from
/// the timer store, not itself persisted).
pub struct AggregatorTransformer<K, V, A, Agg, S>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send,
    A: Serialize + DeserializeOwned + Clone + Send,
    S: StateStore,
    Agg: Aggregator<K, V, A>,
{
    config: WindowAggregationConfig,
    aggregate_store: CachingKVStore<TimeWindowed<K>, A, S>,
    timer_store: PersistentTimerStore<i64, S>,
    non_expired_window_start_times: HashSet<i64>,
    aggregator: Agg,
    custom_window_start: Option<CustomWindowStart<K, V>>,
    metrics: Metrics,
}

impl<K, V, A, Agg, S> AggregatorTransformer<K, V, A, Agg, S>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send,
    A: Serialize + DeserializeOwned + Clone + Send,
    S: StateStore,
    Agg: Aggregator<K, V, A>,
{
    pub fn new(config: WindowAggregationConfig, aggregate_store: S, timer_store: S, aggregator: Agg) -> Self {
        let max_fires = config.max_timer_fires_per_watermark;
        Self {
            config,
            aggregate_store: CachingKVStore::new(aggregate_store),
            timer_store: PersistentTimerStore::new(timer_store, max_fires),
            non_expired_window_start_times: HashSet::new(),
            aggregator,
            custom_window_start: None,
            metrics: Metrics::default(),
        }
    }

    pub fn with_custom_window_start(mut self, f: impl Fn(i64, &K, &V) -> i64 + Send + 'static) -> Self {
        self.custom_window_start = Some(Box::new(f));
        self
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    /// spec §4.D `onInit`, plus rebuilding `nonExpiredWindowStartTimes` from
    /// whatever `Expire` timers survived a restart (spec §9: "rebuildable
    /// from the timer store on restart").
    pub async fn on_init(&mut self) -> StreamResult<()> {
        self.timer_store.on_init().await?;
        self.non_expired_window_start_times.clear();
        for timer in self.timer_store.all_timers().await? {
            if timer.metadata == Metadata::Expire {
                self.non_expired_window_start_times.insert(timer.key);
            }
        }
        Ok(())
    }

    /// spec §4.F `onMessage`.
    pub async fn on_message<C>(&mut self, time: i64, key: K, value: V, ctx: &mut C) -> StreamResult<()>
    where
        C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
    {
        self.on_message_inner(time, key, value, ctx).await.inspect_err(|err| {
            tracing::error!(error = %err, "error propagated out of on_message");
        })
    }

    async fn on_message_inner<C>(&mut self, time: i64, key: K, value: V, ctx: &mut C) -> StreamResult<()>
    where
        C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
    {
        let ws = match &self.custom_window_start {
            Some(f) => f(time, &key, &value),
            None => time - time.rem_euclid(self.config.window_size_ms),
        };
        let watermark = ctx.current_watermark();
        let is_late = ws + self.config.window_size_ms + self.config.allowed_lateness_ms <= watermark;

        if is_late {
            let init = self.run_initializer()?;
            let acc = self.run_aggregate(&key, value, init)?;
            let wk = TimeWindowed::new(ws, self.config.window_size_ms, key);
            tracing::debug!(ws, watermark, "late record restated without mutating state");
            ctx.forward(wk, WindowedValue::new(ResultState::Restatement, acc), watermark);
            self.metrics.num_restatements += 1;
            return Ok(());
        }

        self.add_window_timers_if_new(ws, ctx).await?;

        let wk = TimeWindowed::new(ws, self.config.window_size_ms, key.clone());
        let acc = match self.aggregate_store.get(&wk).await? {
            Some(acc) => acc,
            None => self.run_initializer()?,
        };
        let acc = self.run_aggregate(&key, value, acc)?;
        self.aggregate_store.put(wk, acc);
        Ok(())
    }

    /// Runs the user's `initializer`, converting a failure into
    /// `StreamError::UserCallback` (spec §7: fatal to the task). Logged by
    /// the caller at the point it leaves `on_message`.
    fn run_initializer(&self) -> StreamResult<A> {
        self.aggregator.initializer().map_err(StreamError::UserCallback)
    }

    /// Runs the user's `aggregate`, converting a failure into
    /// `StreamError::UserCallback` (spec §7: fatal to the task). Logged by
    /// the caller at the point it leaves `on_message`.
    fn run_aggregate(&self, key: &K, value: V, acc: A) -> StreamResult<A> {
        self.aggregator.aggregate(key, value, acc).map_err(StreamError::UserCallback)
    }

    /// spec §4.F `addWindowTimersIfNew`.
    async fn add_window_timers_if_new<C>(&mut self, ws: i64, ctx: &mut C) -> StreamResult<()>
    where
        C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
    {
        if !self.non_expired_window_start_times.insert(ws) {
            return Ok(());
        }

        let window_size_ms = self.config.window_size_ms;
        let allowed_lateness_ms = self.config.allowed_lateness_ms;
        let queryable_after_close_ms = self.config.queryable_after_close_ms;
        let emit_on_close = self.config.emit_on_close;

        let Self { timer_store, aggregate_store, non_expired_window_start_times, metrics, .. } = self;
        let mut handler =
            EventTimerHandler { aggregate_store, non_expired_window_start_times, metrics, ctx };

        if emit_on_close {
            timer_store
                .add_timer(ws + window_size_ms + allowed_lateness_ms, Metadata::Close, ws, &mut handler)
                .await?;
        }
        let expire_time = ws + window_size_ms + allowed_lateness_ms + queryable_after_close_ms;
        timer_store.add_timer(expire_time, Metadata::Expire, ws, &mut handler).await?;
        Ok(())
    }

    /// spec §6 `commitCallback()` → cache flush. When
    /// `emitUpdatedEntriesOnCommit`, the flush listener re-reads the
    /// post-merge canonical value and forwards a `WindowOpen` snapshot
    /// (spec §4.F, resolving the open question in spec §9 in favor of
    /// "post-flush canonical").
    pub async fn on_commit<C>(&mut self, ctx: &mut C) -> StreamResult<()>
    where
        C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
    {
        if !self.config.emit_updated_entries_on_commit {
            self.aggregate_store.flush().await?;
            return Ok(());
        }

        let watermark = ctx.current_watermark();
        let mut emitted: Vec<(TimeWindowed<K>, A)> = Vec::new();
        self.aggregate_store
            .flush_with(|wk, acc| emitted.push((wk.clone(), acc.clone())))
            .await?;
        for (wk, acc) in emitted {
            ctx.forward(wk, WindowedValue::new(ResultState::WindowOpen, acc), watermark);
            self.metrics.emit_early += 1;
        }
        Ok(())
    }

    /// spec §4.C/§4.D watermark advance: fires due `Close`/`Expire` timers.
    pub async fn on_watermark<C>(&mut self, w: i64, ctx: &mut C) -> StreamResult<()>
    where
        C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
    {
        let Self { timer_store, aggregate_store, non_expired_window_start_times, metrics, .. } = self;
        let mut handler =
            EventTimerHandler { aggregate_store, non_expired_window_start_times, metrics, ctx };
        timer_store.on_watermark(w, &mut handler).await.inspect_err(|err| {
            tracing::error!(error = %err, "error propagated out of on_watermark");
        })
    }
}

/// Adapter that lets `PersistentTimerStore` call back into the parts of
/// `AggregatorTransformer` it needs, without storing a listener that would
/// alias `timer_store` itself — built fresh per call via Rust's disjoint
/// field borrows (`let Self { a, b, .. } = self`).
struct EventTimerHandler<'a, K, A, S, C>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send,
    A: Serialize + DeserializeOwned + Clone + Send,
    S: StateStore,
{
    aggregate_store: &'a mut CachingKVStore<TimeWindowed<K>, A, S>,
    non_expired_window_start_times: &'a mut HashSet<i64>,
    metrics: &'a mut Metrics,
    ctx: &'a mut C,
}

#[async_trait::async_trait]
impl<'a, K, A, S, C> TimerListener<i64> for EventTimerHandler<'a, K, A, S, C>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync,
    A: Serialize + DeserializeOwned + Clone + Send + Sync,
    S: StateStore,
    C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
{
    /// spec §4.F `onEventTimer`.
    async fn on_timer(&mut self, time: i64, metadata: Metadata, ws: i64) -> StreamResult<()> {
        self.on_timer_inner(time, metadata, ws).await.inspect_err(|err| {
            tracing::error!(error = %err, "error propagated out of on_timer");
        })
    }
}

impl<'a, K, A, S, C> EventTimerHandler<'a, K, A, S, C>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync,
    A: Serialize + DeserializeOwned + Clone + Send + Sync,
    S: StateStore,
    C: ProcessorContext<TimeWindowed<K>, WindowedValue<A>> + Send,
{
    async fn on_timer_inner(&mut self, _time: i64, metadata: Metadata, ws: i64) -> StreamResult<()> {
        let watermark = self.ctx.current_watermark();
        match metadata {
            Metadata::Close => {
                let from = TimeWindowed::<K>::window_start_prefix(ws);
                let to = TimeWindowed::<K>::window_start_prefix(ws + 1);
                let entries = self.aggregate_store.range(from, to).await?;
                for (wk, agg) in entries {
                    self.ctx.forward(wk, WindowedValue::new(ResultState::WindowClosed, agg), watermark);
                }
                self.metrics.closed_windows += 1;
                tracing::info!(ws, "window closed");
                Ok(())
            }
            Metadata::Expire => {
                let from = TimeWindowed::<K>::window_start_prefix(ws);
                let to = TimeWindowed::<K>::window_start_prefix(ws + 1);
                self.aggregate_store.delete_range_without_changelog(from, to).await?;
                self.non_expired_window_start_times.remove(&ws);
                self.metrics.expired_windows += 1;
                tracing::info!(ws, "window expired");
                Ok(())
            }
            Metadata::User(_) => Err(StreamError::Invariant(
                "unexpected user timer metadata registered against the window timer store".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tw_storage::MemoryStateStore;

    use super::*;
    use crate::context::RecordingContext;

    struct SumAggregator;

    impl Aggregator<String, i64, i64> for SumAggregator {
        fn initializer(&self) -> anyhow::Result<i64> {
            Ok(0)
        }

        fn aggregate(&self, _key: &String, value: i64, acc: i64) -> anyhow::Result<i64> {
            Ok(acc + value)
        }
    }

    struct FailingAggregator;

    impl Aggregator<String, i64, i64> for FailingAggregator {
        fn initializer(&self) -> anyhow::Result<i64> {
            Ok(0)
        }

        fn aggregate(&self, _key: &String, _value: i64, _acc: i64) -> anyhow::Result<i64> {
            Err(anyhow::anyhow!("aggregation blew up"))
        }
    }

    fn config() -> WindowAggregationConfig {
        WindowAggregationConfig {
            window_size_ms: 60_000,
            allowed_lateness_ms: 5_000,
            queryable_after_close_ms: 10_000,
            emit_on_close: true,
            emit_updated_entries_on_commit: false,
            ..Default::default()
        }
    }

    fn transformer() -> AggregatorTransformer<String, i64, i64, SumAggregator, MemoryStateStore> {
        AggregatorTransformer::new(
            config(),
            MemoryStateStore::new(),
            MemoryStateStore::new(),
            SumAggregator,
        )
    }

    #[tokio::test]
    async fn failing_aggregate_callback_surfaces_as_user_callback_error() {
        let mut t = AggregatorTransformer::new(
            config(),
            MemoryStateStore::new(),
            MemoryStateStore::new(),
            FailingAggregator,
        );
        let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

        let err = t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap_err();

        assert_matches!(err, StreamError::UserCallback(_));
    }

    #[tokio::test]
    async fn scenario_1_basic_aggregation_closes_on_watermark() {
        let mut t = transformer();
        let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

        t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
        t.on_message(2000, "a".to_string(), 2, &mut ctx).await.unwrap();

        // Close fires at ws+windowSize+allowedLateness = 65000; chosen below
        // the 75000 expire threshold so this watermark advance closes the
        // window without also expiring it in the same call (see
        // DESIGN.md's note on the spec's scenario-1/3 watermark numbers).
        ctx.set_watermark(70_000);
        t.on_watermark(70_000, &mut ctx).await.unwrap();

        assert_eq!(ctx.forwarded.len(), 1);
        let (wk, wv, ts) = &ctx.forwarded[0];
        assert_eq!(wk, &TimeWindowed::new(0, 60_000, "a".to_string()));
        assert_eq!(wv, &WindowedValue::new(ResultState::WindowClosed, 3));
        assert_eq!(*ts, 70_000);
        assert_eq!(t.metrics().closed_windows, 1);
    }

    #[tokio::test]
    async fn scenario_2_late_record_is_restated_not_merged() {
        let mut t = transformer();
        let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();
        t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
        t.on_message(2000, "a".to_string(), 2, &mut ctx).await.unwrap();
        ctx.set_watermark(70_000);
        t.on_watermark(70_000, &mut ctx).await.unwrap();
        ctx.forwarded.clear();

        t.on_message(3000, "a".to_string(), 5, &mut ctx).await.unwrap();

        assert_eq!(ctx.forwarded.len(), 1);
        let (wk, wv, ts) = &ctx.forwarded[0];
        assert_eq!(wk, &TimeWindowed::new(0, 60_000, "a".to_string()));
        assert_eq!(wv, &WindowedValue::new(ResultState::Restatement, 5));
        assert_eq!(*ts, 70_000);
        assert_eq!(t.metrics().num_restatements, 1);
    }

    #[tokio::test]
    async fn scenario_3_expiration_deletes_window_state() {
        let mut t = transformer();
        let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();
        t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
        t.on_message(2000, "a".to_string(), 2, &mut ctx).await.unwrap();
        ctx.set_watermark(70_000);
        t.on_watermark(70_000, &mut ctx).await.unwrap();
        ctx.forwarded.clear();

        ctx.set_watermark(90_000);
        t.on_watermark(90_000, &mut ctx).await.unwrap();

        assert!(ctx.forwarded.is_empty());
        assert_eq!(t.metrics().expired_windows, 1);

        let wk = TimeWindowed::new(0, 60_000, "a".to_string());
        assert_eq!(t.aggregate_store.get(&wk).await.unwrap(), None);
    }

    #[tokio::test]
    async fn scenario_6_emit_updated_entries_on_commit_reads_post_flush_value() {
        let cfg = WindowAggregationConfig { emit_updated_entries_on_commit: true, ..config() };
        let mut t = AggregatorTransformer::new(
            cfg,
            MemoryStateStore::new(),
            MemoryStateStore::new(),
            SumAggregator,
        );
        let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();
        t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();

        ctx.set_watermark(5_000);
        t.on_commit(&mut ctx).await.unwrap();

        assert_eq!(ctx.forwarded.len(), 1);
        let (wk, wv, ts) = &ctx.forwarded[0];
        assert_eq!(wk, &TimeWindowed::new(0, 60_000, "a".to_string()));
        assert_eq!(wv, &WindowedValue::new(ResultState::WindowOpen, 1));
        assert_eq!(*ts, 5_000);
    }

    #[tokio::test]
    async fn on_init_rebuilds_non_expired_window_start_times_from_expire_timers() {
        let backing_agg = MemoryStateStore::new();
        let backing_timer = MemoryStateStore::new();
        {
            let mut t = AggregatorTransformer::new(
                config(),
                backing_agg.clone(),
                backing_timer.clone(),
                SumAggregator,
            );
            let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();
            t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
            t.aggregate_store.flush().await.unwrap();
            t.timer_store.flush().await.unwrap();
        }

        let mut cold = AggregatorTransformer::new(config(), backing_agg, backing_timer, SumAggregator);
        cold.on_init().await.unwrap();
        assert!(cold.non_expired_window_start_times.contains(&0));
    }
}
