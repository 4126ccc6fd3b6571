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

//! End-to-end reproduction of the six concrete scenarios: windowSize=60000,
//! allowedLateness=5000, queryableAfterClose=10000, emitOnClose=true,
//! initializer=()->0, aggregator=((k,v),a)->a+v.

use pretty_assertions::assert_eq;
use tw_storage::{MemoryStateStore, TimeWindowed};
use tw_stream::context::RecordingContext;
use tw_stream::{Aggregator, AggregatorTransformer, ResultState, WindowAggregationConfig, WindowedValue};

struct SumAggregator;

impl Aggregator<String, i64, i64> for SumAggregator {
    fn initializer(&self) -> anyhow::Result<i64> {
        Ok(0)
    }

    fn aggregate(&self, _key: &String, value: i64, acc: i64) -> anyhow::Result<i64> {
        Ok(acc + value)
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
    AggregatorTransformer::new(config(), MemoryStateStore::new(), MemoryStateStore::new(), SumAggregator)
}

#[tokio::test]
async fn scenario_1_through_3_full_window_lifecycle() {
    let mut t = transformer();
    let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

    // 1. Basic aggregation. Close fires at ws+windowSize+allowedLateness =
    // 65000; the watermark here is chosen below the 75000 expire threshold
    // so this call closes without also expiring (see DESIGN.md).
    t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
    t.on_message(2000, "a".to_string(), 2, &mut ctx).await.unwrap();
    ctx.set_watermark(70_000);
    t.on_watermark(70_000, &mut ctx).await.unwrap();

    assert_eq!(
        ctx.forwarded,
        vec![(
            TimeWindowed::new(0, 60_000, "a".to_string()),
            WindowedValue::new(ResultState::WindowClosed, 3),
            70_000,
        )]
    );
    ctx.forwarded.clear();

    // 2. Restatement: a record for the now-closed window still inside
    // allowedLateness's window-relative bound, but the watermark check is
    // what actually gates it here, and it has already passed.
    t.on_message(3000, "a".to_string(), 5, &mut ctx).await.unwrap();
    assert_eq!(
        ctx.forwarded,
        vec![(
            TimeWindowed::new(0, 60_000, "a".to_string()),
            WindowedValue::new(ResultState::Restatement, 5),
            70_000,
        )]
    );
    ctx.forwarded.clear();

    // 3. Expiration: watermark advances past close + queryableAfterClose.
    ctx.set_watermark(90_000);
    t.on_watermark(90_000, &mut ctx).await.unwrap();
    assert!(ctx.forwarded.is_empty());
    assert_eq!(t.metrics().expired_windows, 1);
}

#[tokio::test]
async fn scenario_6_emit_updated_entries_on_commit() {
    let cfg = WindowAggregationConfig { emit_updated_entries_on_commit: true, ..config() };
    let mut t =
        AggregatorTransformer::new(cfg, MemoryStateStore::new(), MemoryStateStore::new(), SumAggregator);
    let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

    t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
    ctx.set_watermark(5_000);
    t.on_commit(&mut ctx).await.unwrap();

    assert_eq!(
        ctx.forwarded,
        vec![(
            TimeWindowed::new(0, 60_000, "a".to_string()),
            WindowedValue::new(ResultState::WindowOpen, 1),
            5_000,
        )]
    );
}

#[tokio::test]
async fn two_keys_in_the_same_window_close_independently_but_together() {
    let mut t = transformer();
    let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

    t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
    t.on_message(1000, "b".to_string(), 10, &mut ctx).await.unwrap();
    ctx.set_watermark(70_000);
    t.on_watermark(70_000, &mut ctx).await.unwrap();

    let mut forwarded = ctx.forwarded.clone();
    forwarded.sort_by_key(|(wk, _, _)| wk.key.clone());
    assert_eq!(
        forwarded,
        vec![
            (TimeWindowed::new(0, 60_000, "a".to_string()), WindowedValue::new(ResultState::WindowClosed, 1), 70_000),
            (TimeWindowed::new(0, 60_000, "b".to_string()), WindowedValue::new(ResultState::WindowClosed, 10), 70_000),
        ]
    );
}

#[tokio::test]
async fn emit_on_close_false_skips_close_emission_but_still_expires() {
    let cfg = WindowAggregationConfig { emit_on_close: false, ..config() };
    let mut t =
        AggregatorTransformer::new(cfg, MemoryStateStore::new(), MemoryStateStore::new(), SumAggregator);
    let mut ctx: RecordingContext<TimeWindowed<String>, WindowedValue<i64>> = RecordingContext::new();

    // emitOnClose=false means no Close timer is ever registered for this
    // window, only Expire@75000 — so a single watermark advance past it is
    // unambiguous here, unlike the full-lifecycle scenario above.
    t.on_message(1000, "a".to_string(), 1, &mut ctx).await.unwrap();
    ctx.set_watermark(80_000);
    t.on_watermark(80_000, &mut ctx).await.unwrap();
    assert!(ctx.forwarded.is_empty());
    assert_eq!(t.metrics().closed_windows, 0);
    assert_eq!(t.metrics().expired_windows, 1);

    ctx.set_watermark(90_000);
    t.on_watermark(90_000, &mut ctx).await.unwrap();
    assert_eq!(t.metrics().expired_windows, 1);
}
