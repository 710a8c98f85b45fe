//! Chunked transfer engine.
//!
//! Large payloads are split into fixed-size byte ranges that move independently, at
//! most `max_concurrency` at a time per engine. Each engine belongs to one backend
//! handle, so the bound is shared by every transfer running through that handle.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use folio_core::StorageSettings;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::{OwnedMutexGuard, Semaphore};

use crate::traits::{StorageError, StorageResult};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Payloads larger than this are chunked; also the size of every chunk but the last.
    pub chunk_size: usize,
    pub max_concurrency: usize,
    /// Deadline for a single chunk request. Expiry counts as a failed attempt.
    pub chunk_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_settings(&StorageSettings::default())
    }
}

impl TransferSettings {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            max_concurrency: settings.upload_concurrency,
            chunk_timeout: Duration::from_secs(settings.chunk_timeout_secs),
            max_attempts: settings.chunk_max_attempts,
        }
    }
}

/// Position of one chunk inside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    /// Inclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.length - 1
    }

    pub fn as_range(&self) -> Range<u64> {
        self.offset..self.offset + self.length
    }

    /// `Content-Range` value for an upload: `bytes {start}-{end}/{total}`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.offset, self.end(), total)
    }

    /// `Range` request header value: `bytes={start}-{end}`.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.end())
    }
}

/// One chunk of an upload, with its bytes.
#[derive(Debug, Clone)]
pub struct TransferChunk {
    pub range: ChunkRange,
    pub total: u64,
    pub data: Bytes,
}

impl TransferChunk {
    pub fn content_range(&self) -> String {
        self.range.content_range(self.total)
    }
}

/// Split `[0, total)` into contiguous ranges of at most `chunk_size` bytes.
pub fn plan_chunks(total: u64, chunk_size: usize) -> Vec<ChunkRange> {
    let chunk_size = chunk_size.max(1) as u64;
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < total {
        let length = chunk_size.min(total - offset);
        ranges.push(ChunkRange {
            index: ranges.len(),
            offset,
            length,
        });
        offset += length;
    }
    ranges
}

/// In-flight counters for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub max_concurrency: usize,
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ChunkedTransferEngine {
    settings: TransferSettings,
    permits: Arc<Semaphore>,
    destinations: DestinationLocks,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ChunkedTransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self {
            settings,
            permits,
            destinations: DestinationLocks::default(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn requires_chunking(&self, len: u64) -> bool {
        len > self.settings.chunk_size as u64
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            max_concurrency: self.settings.max_concurrency.max(1),
        }
    }

    /// Serialize writers of one destination. Hold the guard for the whole upload.
    pub async fn lock_destination(&self, dest: &str) -> DestinationGuard<'_> {
        self.destinations.lock(dest).await
    }

    /// Run a single-request transfer under the engine's permit, timeout and attempt policy.
    pub async fn single<T, F, Fut>(&self, target: &str, length: u64, request: F) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let range = ChunkRange {
            index: 0,
            offset: 0,
            length,
        };
        let (_, value) = self.run_chunk(target, range, request).await?;
        Ok(value)
    }

    /// Upload `data` in chunks, calling `send_chunk` once per chunk.
    ///
    /// Returns the per-chunk results ordered by chunk index. The first chunk that
    /// exhausts its attempts aborts the transfer; chunks still queued are dropped.
    pub async fn upload<T, F, Fut>(&self, dest: &str, data: Bytes, send_chunk: F) -> StorageResult<Vec<T>>
    where
        T: Send,
        F: Fn(TransferChunk) -> Fut + Sync,
        Fut: Future<Output = StorageResult<T>> + Send,
    {
        let total = data.len() as u64;
        let ranges = plan_chunks(total, self.settings.chunk_size);
        let chunk_count = ranges.len();
        let start = std::time::Instant::now();
        let send_chunk = &send_chunk;

        let mut results: Vec<(usize, T)> = stream::iter(ranges)
            .map(|range| {
                let chunk = TransferChunk {
                    range,
                    total,
                    data: data.slice(range.offset as usize..(range.offset + range.length) as usize),
                };
                self.run_chunk(dest, range, move || send_chunk(chunk.clone()))
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .try_collect()
            .await?;

        results.sort_by_key(|(index, _)| *index);

        tracing::info!(
            dest = %dest,
            size_bytes = total,
            chunks = chunk_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Chunked upload complete"
        );

        Ok(results.into_iter().map(|(_, value)| value).collect())
    }

    /// Download `total` bytes with ranged reads and reassemble them by ascending offset.
    pub async fn download<F, Fut>(&self, src: &str, total: u64, fetch_range: F) -> StorageResult<Bytes>
    where
        F: Fn(ChunkRange) -> Fut + Sync,
        Fut: Future<Output = StorageResult<Bytes>> + Send,
    {
        let ranges = plan_chunks(total, self.settings.chunk_size);
        let chunk_count = ranges.len();
        let start = std::time::Instant::now();
        let fetch_range = &fetch_range;

        let mut parts: Vec<(usize, Bytes)> = stream::iter(ranges)
            .map(|range| {
                self.run_chunk(src, range, move || async move {
                    let bytes = fetch_range(range).await?;
                    if bytes.len() as u64 != range.length {
                        return Err(StorageError::DownloadFailed(format!(
                            "expected {} bytes, received {}",
                            range.length,
                            bytes.len()
                        )));
                    }
                    Ok(bytes)
                })
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .try_collect()
            .await?;

        parts.sort_by_key(|(index, _)| *index);

        let mut body = BytesMut::with_capacity(total as usize);
        for (_, part) in parts {
            body.extend_from_slice(&part);
        }

        tracing::info!(
            src = %src,
            size_bytes = total,
            chunks = chunk_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Chunked download complete"
        );

        Ok(body.freeze())
    }

    async fn run_chunk<T, F, Fut>(
        &self,
        target: &str,
        range: ChunkRange,
        attempt_fn: F,
    ) -> StorageResult<(usize, T)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StorageError::BackendError("transfer engine is closed".to_string()))?;
        let _in_flight = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let reason = match tokio::time::timeout(self.settings.chunk_timeout, attempt_fn()).await {
                Ok(Ok(value)) => return Ok((range.index, value)),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.settings.chunk_timeout),
            };

            if attempt >= max_attempts {
                tracing::error!(
                    target_path = %target,
                    offset = range.offset,
                    length = range.length,
                    attempts = attempt,
                    error = %reason,
                    "Chunk transfer failed"
                );
                return Err(StorageError::Transfer {
                    offset: range.offset,
                    length: range.length,
                    reason,
                });
            }

            tracing::warn!(
                target_path = %target,
                offset = range.offset,
                length = range.length,
                attempt = attempt,
                error = %reason,
                "Chunk transfer attempt failed, retrying"
            );
            attempt += 1;
        }
    }
}

/// Per-destination async mutexes. Entries disappear once no writer holds or awaits them.
#[derive(Default)]
pub struct DestinationLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct DestinationGuard<'a> {
    locks: &'a DestinationLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl DestinationLocks {
    pub async fn lock(&self, dest: &str) -> DestinationGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(dest.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        DestinationGuard {
            locks: self,
            key: dest.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of destinations currently locked or awaited.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for DestinationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
