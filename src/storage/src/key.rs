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

//! Encodings for the two persisted key layouts named in spec §6:
//!
//! - the timer store: `timeBE(8) || metadataByte(1) [|| len(4) || payload] || serializedKey`
//! - the aggregate store: `windowStartBE(8) || sizeBE(8) || serializedKey`
//!
//! Both put a fixed-width, order-preserving prefix first so that a scan
//! bounded only by that prefix (`Timer::time_prefix`,
//! `TimeWindowed::window_start_prefix`) needs no deserialization of entries
//! before the bound — the whole reason component A exists instead of a plain
//! derive(Serialize) key.
//!
//! The generic application key `K` is encoded with `memcomparable`, an
//! order-preserving serde backend, so that byte-lexicographic order on the
//! wire matches `K`'s `Ord` impl for the key types this crate is exercised
//! with (integers, strings, and tuples of either).

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

/// Encodes a signed 64-bit integer so that unsigned byte-lexicographic order
/// on the result matches numeric order on the input (spec §4.A: "big-endian
/// fixed 8 bytes with sign-flipped top bit").
pub fn encode_i64(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1u64 << 63)).to_be_bytes()
}

pub fn decode_i64(buf: &[u8]) -> StorageResult<i64> {
    let arr: [u8; 8] = buf
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| StorageError::Encoding("expected 8 bytes for i64".into()))?;
    Ok((u64::from_be_bytes(arr) ^ (1u64 << 63)) as i64)
}

fn encode_key<K: Serialize>(key: &K) -> StorageResult<Vec<u8>> {
    memcomparable::to_vec(key).map_err(|e| StorageError::Encoding(e.to_string()))
}

fn decode_key<K: DeserializeOwned>(bytes: &[u8]) -> StorageResult<K> {
    memcomparable::from_slice(bytes).map_err(|e| StorageError::Encoding(e.to_string()))
}

/// Timer metadata tag (spec §3: `metadata ∈ {Close, Expire, <user>}`).
///
/// Declaration order fixes the tie-break within a timestamp:
/// `Close < Expire < User(..)`, matching spec §4.F's note that Close/Expire
/// ordering among themselves is inconsequential ("behavior is equivalent").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Metadata {
    Close,
    Expire,
    User(Bytes),
}

impl Metadata {
    fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            Metadata::Close => buf.put_u8(0),
            Metadata::Expire => buf.put_u8(1),
            Metadata::User(payload) => {
                buf.put_u8(2);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
    }

    /// Returns the decoded metadata and the number of bytes consumed.
    fn decode_from(buf: &[u8]) -> StorageResult<(Self, usize)> {
        let tag = *buf
            .first()
            .ok_or_else(|| StorageError::Encoding("empty metadata bytes".into()))?;
        match tag {
            0 => Ok((Metadata::Close, 1)),
            1 => Ok((Metadata::Expire, 1)),
            2 => {
                let len_bytes = buf
                    .get(1..5)
                    .ok_or_else(|| StorageError::Encoding("truncated user-metadata length".into()))?;
                let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                let payload = buf
                    .get(5..5 + len)
                    .ok_or_else(|| StorageError::Encoding("truncated user-metadata payload".into()))?;
                Ok((Metadata::User(Bytes::copy_from_slice(payload)), 5 + len))
            }
            other => Err(StorageError::Encoding(format!("unknown metadata tag {other}"))),
        }
    }
}

/// `Timer[K]` — spec §3: `(time, metadata, key)`, ordered first by `time`
/// ascending, then `metadata`, then `key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timer<K> {
    pub time: i64,
    pub metadata: Metadata,
    pub key: K,
}

impl<K> Timer<K> {
    pub fn new(time: i64, metadata: Metadata, key: K) -> Self {
        Self { time, metadata, key }
    }

    /// The shortest byte prefix bounding every timer at exactly `time`,
    /// regardless of metadata or key (spec §4.A `timeToPrefix`).
    pub fn time_prefix(time: i64) -> Bytes {
        Bytes::copy_from_slice(&encode_i64(time))
    }
}

impl<K: Serialize> Timer<K> {
    pub fn to_bytes(&self) -> StorageResult<Bytes> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_slice(&encode_i64(self.time));
        self.metadata.encode_to(&mut buf);
        buf.put_slice(&encode_key(&self.key)?);
        Ok(buf.freeze())
    }
}

impl<K: DeserializeOwned> Timer<K> {
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let time = decode_i64(bytes)?;
        let (metadata, consumed) = Metadata::decode_from(&bytes[8..])?;
        let key = decode_key(&bytes[8 + consumed..])?;
        Ok(Self { time, metadata, key })
    }
}

/// `TimeWindowed[K]` — spec §3: `(startMs, sizeMs, key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeWindowed<K> {
    pub start_ms: i64,
    pub size_ms: i64,
    pub key: K,
}

impl<K> TimeWindowed<K> {
    pub fn new(start_ms: i64, size_ms: i64, key: K) -> Self {
        Self { start_ms, size_ms, key }
    }

    /// Bounding prefix for "every window whose start is `start_ms`",
    /// independent of size or key (spec §4.F: `windowStartBytes(ws)`).
    pub fn window_start_prefix(start_ms: i64) -> Bytes {
        Bytes::copy_from_slice(&encode_i64(start_ms))
    }
}

impl<K: Serialize> TimeWindowed<K> {
    pub fn to_bytes(&self) -> StorageResult<Bytes> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_slice(&encode_i64(self.start_ms));
        buf.put_slice(&encode_i64(self.size_ms));
        buf.put_slice(&encode_key(&self.key)?);
        Ok(buf.freeze())
    }
}

impl<K: DeserializeOwned> TimeWindowed<K> {
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let start_ms = decode_i64(&bytes[0..8])?;
        let size_ms = decode_i64(&bytes[8..16])?;
        let key = decode_key(&bytes[16..])?;
        Ok(Self { start_ms, size_ms, key })
    }
}
