//! History sync primitives
//!
//! Progress accounting for multi-chunk history delivery, the policy deciding
//! which sync types are imported, and payload decoding.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use prost::Message as _;
use serde::{Deserialize, Serialize};

use crate::binary::Compression;
use crate::errors::{HistoryError, Result};
use crate::proto::{HistorySync, HistorySyncType};

// ----------------------------------------------------------------------------
// Progress Tracking
// ----------------------------------------------------------------------------

/// Highest chunk order a track accepts, exclusive
pub const MAX_TRACKED_CHUNKS: u32 = 4096;

/// Reject chunk orders the tracker cannot hold
pub fn check_chunk_order(chunk: u32) -> std::result::Result<(), HistoryError> {
    if chunk >= MAX_TRACKED_CHUNKS {
        return Err(HistoryError::ChunkOutOfRange {
            chunk,
            limit: MAX_TRACKED_CHUNKS - 1,
        });
    }
    Ok(())
}

/// Which chunks of one sync track have arrived
///
/// `commit` marks a chunk; the chunk flagged as finished fixes the end
/// watermark. The track is done once the watermark is set and every chunk
/// below it has been committed. Commits are idempotent. Chunk orders at or
/// above [`MAX_TRACKED_CHUNKS`] are refused and leave the tracker untouched.
#[derive(Debug, Default)]
pub struct HistorySyncProgressTracker {
    chunks: Mutex<Vec<u64>>,
    chunk_end: AtomicU32,
}

impl HistorySyncProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&self, chunk: u32, finished: bool) -> std::result::Result<(), HistoryError> {
        check_chunk_order(chunk)?;
        {
            let mut words = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
            let word = (chunk / 64) as usize;
            if words.len() <= word {
                words.resize(word + 1, 0);
            }
            words[word] |= 1 << (chunk % 64);
        }
        if finished {
            self.chunk_end.store(chunk, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        let end = self.chunk_end.load(Ordering::SeqCst);
        if end == 0 {
            return false;
        }
        let words = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        (0..end).all(|chunk| {
            words
                .get((chunk / 64) as usize)
                .is_some_and(|word| word & (1 << (chunk % 64)) != 0)
        })
    }

    pub fn committed_chunks(&self) -> Vec<u32> {
        let words = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        words
            .iter()
            .enumerate()
            .flat_map(|(index, word)| {
                (0..64u32)
                    .filter(move |bit| word & (1 << bit) != 0)
                    .map(move |bit| index as u32 * 64 + bit)
            })
            .collect()
    }

    pub fn chunk_end(&self) -> u32 {
        self.chunk_end.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.chunk_end.store(0, Ordering::SeqCst);
    }
}

/// Independent progress tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncTrack {
    Recent,
    Full,
}

impl SyncTrack {
    /// Track a chunked sync type reports into; `None` for one-shot types
    pub fn for_sync_type(sync_type: HistorySyncType) -> Option<Self> {
        match sync_type {
            HistorySyncType::InitialBootstrap | HistorySyncType::Recent => Some(SyncTrack::Recent),
            HistorySyncType::Full => Some(SyncTrack::Full),
            HistorySyncType::InitialStatusV3
            | HistorySyncType::PushName
            | HistorySyncType::NonBlockingData
            | HistorySyncType::OnDemand => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Policy
// ----------------------------------------------------------------------------

/// How much history this client imports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryPolicy {
    /// Everything the primary device sends
    #[default]
    Full,
    /// Skip the full backfill, keep the recent window
    Recent,
    /// Only contact names and group membership hints
    Disabled,
}

impl HistoryPolicy {
    pub fn accepts(&self, sync_type: HistorySyncType) -> bool {
        match (self, sync_type) {
            (_, HistorySyncType::PushName | HistorySyncType::NonBlockingData) => true,
            (HistoryPolicy::Full, _) => true,
            (HistoryPolicy::Recent, HistorySyncType::Full) => false,
            (HistoryPolicy::Recent, _) => true,
            (HistoryPolicy::Disabled, _) => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

/// Inflate and decode a history blob
pub fn decode_history_payload(data: &[u8]) -> Result<HistorySync> {
    let inflated = Compression::decompress(data)?;
    Ok(HistorySync::decode(inflated.as_slice())?)
}

pub fn encode_history_payload(history: &HistorySync) -> Result<Vec<u8>> {
    Ok(Compression::compress(&history.encode_to_vec())?)
}

/// Sync type of a decoded payload
pub fn sync_type_of(history: &HistorySync) -> Result<HistorySyncType> {
    let value = history.sync_type.unwrap_or_default();
    HistorySyncType::try_from(value).map_err(|_| HistoryError::UnknownSyncType { value }.into())
}
