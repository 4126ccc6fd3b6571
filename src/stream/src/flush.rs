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

//! Component E: bounded outstanding asynchronous work, joined at commit
//! boundaries (spec §4.E).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{StreamError, StreamResult};

/// Tracks outstanding async unit-of-work completions for one task.
///
/// Permit acquisition (`max_outstanding_futures_per_task`) is what provides
/// backpressure; completions may land out of order. There is no
/// cancellation — a timeout is only ever observed at [`Self::on_flush`].
pub struct AsyncFlushCoordinator {
    semaphore: Arc<Semaphore>,
    max_outstanding: usize,
    joined: JoinSet<()>,
    async_failure: Arc<Mutex<Option<anyhow::Error>>>,
    flush_timeout: Duration,
}

impl AsyncFlushCoordinator {
    pub fn new(max_outstanding_futures_per_task: usize, flush_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_outstanding_futures_per_task)),
            max_outstanding: max_outstanding_futures_per_task,
            joined: JoinSet::new(),
            async_failure: Arc::new(Mutex::new(None)),
            flush_timeout,
        }
    }

    /// `maxOutstandingFuturesPerTask - available_permits`.
    pub fn num_outstanding_futures(&self) -> usize {
        self.max_outstanding - self.semaphore.available_permits()
    }

    /// Re-raises a previously captured async failure, if any (spec §4.E /
    /// §7 `AsyncWorkError`: "captured in `asyncFailure`, re-raised on next
    /// `addFuture` or flush").
    pub fn throw_if_async_failure(&self) -> StreamResult<()> {
        if let Some(err) = self.async_failure.lock().take() {
            return Err(StreamError::AsyncWork(err));
        }
        Ok(())
    }

    /// Acquires one permit, then spawns `fut` as a tracked background unit
    /// of work. Any error it returns is captured as `asyncFailure` rather
    /// than propagated here — the caller observes it on the next call to
    /// this method or to [`Self::on_flush`].
    pub async fn add_future<F>(&mut self, fut: F) -> StreamResult<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.throw_if_async_failure()?;
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let failure_slot = self.async_failure.clone();
        self.joined.spawn(async move {
            let result = fut.await;
            drop(permit);
            if let Err(err) = result {
                tracing::error!(error = %err, "async unit of work failed");
                *failure_slot.lock() = Some(err);
            }
        });
        Ok(())
    }

    /// Joins every outstanding future, bounded by `flush_timeout`. On
    /// timeout this is a fatal `FlushTimeout` (spec §7).
    pub async fn on_flush(&mut self) -> StreamResult<()> {
        let outstanding = self.joined.len();
        let join_all = async {
            while self.joined.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.flush_timeout, join_all).await.is_err() {
            tracing::error!(outstanding, "timed out joining outstanding async work on flush");
            return Err(StreamError::FlushTimeout { outstanding });
        }
        self.throw_if_async_failure()
    }
}
