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

use thiserror::Error;
use tw_storage::StorageError;

pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Spec §7's error taxonomy, one variant per named class.
#[derive(Error, Debug)]
pub enum StreamError {
    /// `TransientStoreError`: propagate; the host runtime restarts the task.
    #[error("transient store error: {0}")]
    Storage(#[from] StorageError),

    /// `UserCallbackError`: an aggregator/initializer/`onTimer` callback
    /// failed. Fatal to the task.
    #[error("user callback failed: {0}")]
    UserCallback(#[source] anyhow::Error),

    /// `InvariantViolation`: e.g. a timer fired out of order, or the
    /// watermark regressed. Always a bug, never recoverable in place.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// `AsyncWorkError`: captured by `AsyncFlushCoordinator` and re-raised on
    /// the next `addFuture`/`onFlush`.
    #[error("asynchronous work failed: {0}")]
    AsyncWork(#[source] anyhow::Error),

    /// `FlushTimeout`: thrown from `onFlush` when outstanding futures don't
    /// complete within `flushTimeout`.
    #[error("flush timed out waiting for {outstanding} outstanding future(s)")]
    FlushTimeout { outstanding: usize },
}
