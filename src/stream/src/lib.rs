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

//! An event-time stream-processing core: a persistent, watermark-driven
//! timer store (component D, over the byte encoding in component A and the
//! write-through cache in component B) and a tumbling-window aggregation
//! transformer built on top of it (component F), plus the watermark
//! tracking (component C) and bounded async flush coordination (component
//! E) it needs to run.
//!
//! The host streaming runtime — partitioning, record delivery, topology
//! construction, changelog replication — is out of scope; this crate
//! consumes it through [`context::ProcessorContext`].

pub mod aggregator;
pub mod config;
pub mod context;
pub mod error;
pub mod flush;
pub mod timer_store;
pub mod watermark;

pub use aggregator::{Aggregator, AggregatorTransformer, Metrics};
pub use config::WindowAggregationConfig;
pub use context::{ProcessorContext, ResultState, WindowedValue};
pub use error::{StreamError, StreamResult};
pub use flush::AsyncFlushCoordinator;
pub use timer_store::{PersistentTimerStore, TimerListener};
pub use watermark::{BufferedWatermarks, EmissionPolicy, WatermarkTracker};
