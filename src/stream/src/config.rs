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

//! Configuration for an `AggregatorTransformer` (spec §6 "Configuration").
//!
//! Every field defaults, so a partial (or empty) TOML document is valid —
//! the engine should run with sane defaults when an option is unset.

use std::time::Duration;

use serde::Deserialize;

fn default_window_size_ms() -> i64 {
    60_000
}

fn default_allowed_lateness_ms() -> i64 {
    5_000
}

fn default_queryable_after_close_ms() -> i64 {
    10_000
}

fn default_emit_on_close() -> bool {
    true
}

fn default_max_timer_fires_per_watermark() -> usize {
    10_000
}

fn default_max_outstanding_futures_per_task() -> usize {
    256
}

fn default_flush_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowAggregationConfig {
    /// Duration of the tumbling window.
    pub window_size_ms: i64,
    /// Grace period before a window closes.
    pub allowed_lateness_ms: i64,
    /// Time a window's state remains readable after close.
    pub queryable_after_close_ms: i64,
    /// Whether to emit all entries of a window on close.
    pub emit_on_close: bool,
    /// Whether to emit open-window snapshots on every commit.
    pub emit_updated_entries_on_commit: bool,
    /// Upper bound of timers fired per watermark advance.
    pub max_timer_fires_per_watermark: usize,
    /// Backpressure limit on outstanding async unit-of-work futures.
    pub max_outstanding_futures_per_task: usize,
    /// Bound on the join-on-flush wait, in milliseconds.
    pub flush_timeout_ms: u64,
}

impl Default for WindowAggregationConfig {
    fn default() -> Self {
        Self {
            window_size_ms: default_window_size_ms(),
            allowed_lateness_ms: default_allowed_lateness_ms(),
            queryable_after_close_ms: default_queryable_after_close_ms(),
            emit_on_close: default_emit_on_close(),
            emit_updated_entries_on_commit: false,
            max_timer_fires_per_watermark: default_max_timer_fires_per_watermark(),
            max_outstanding_futures_per_task: default_max_outstanding_futures_per_task(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl WindowAggregationConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}
