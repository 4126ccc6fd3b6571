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

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the `StateStore` collaborator and everything built on top of it.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("backing store I/O error: {0}")]
    Io(#[from] anyhow::Error),

    #[error("malformed key bytes: {0}")]
    Encoding(String),

    #[error("value (de)serialization failed: {0}")]
    Serde(#[from] bincode::Error),
}
