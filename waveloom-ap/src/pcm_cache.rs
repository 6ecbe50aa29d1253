//! Buffers PCM between the decoder and the rest of the pipeline.
//!
//! Backed by memory or a scratch file depending on the track's known length
//! and available system memory. Radio streams (unknown length, unbounded)
//! always land in memory and are consumed destructively: once a chunk is
//! handed out it is dropped from the buffer, since there is no seeking back
//! into a live stream.

use crate::audio::format::{AudioFormat, PcmChunk};
use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

pub const BUFFER_CREATE_MILLISECONDS: i64 = 50;
pub const DEFAULT_PCM_MEMORY_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_PCM_MEMORY_BYTES: u64 = 500 * 1024 * 1024;

type ChunkCallback = Box<dyn FnMut(PcmChunk) + Send>;

enum Backend {
    File(File),
    /// Destructive-read ring when `radio_station` is set; plain append-only
    /// buffer otherwise.
    Memory(Vec<u8>),
}

struct Inner {
    backend: Backend,
    read_position: u64,
    unfulfilled_request: bool,
}

pub struct PcmCache {
    format: AudioFormat,
    radio_station: bool,
    chunk_bytes: i64,
    inner: Mutex<Inner>,
    on_chunk: Mutex<Option<ChunkCallback>>,
}

impl PcmCache {
    /// `length_hint_ms` is 0 (or negative) when the total length is unknown,
    /// e.g. a radio stream. Chooses the storage backend the way `run()` did
    /// in the original implementation: a scratch file unless the length is
    /// known and its footprint fits in available memory.
    pub fn new(format: AudioFormat, length_hint_ms: i64, radio_station: bool) -> Result<Self> {
        let estimated_bytes = if length_hint_ms > 0 {
            format.bytes_for_duration(length_hint_ms * 1000).max(0) as u64
        } else {
            0
        };

        let want_file = (length_hint_ms <= 0 && !radio_station) || estimated_bytes > available_memory();

        let backend = if want_file {
            match create_scratch_file() {
                Ok(file) => Backend::File(file),
                Err(e) => {
                    warn!("could not create PCM scratch file, falling back to memory: {e}");
                    Backend::Memory(Vec::new())
                }
            }
        } else {
            Backend::Memory(Vec::new())
        };

        Ok(Self {
            format,
            radio_station,
            chunk_bytes: format.bytes_for_duration(BUFFER_CREATE_MILLISECONDS * 1000),
            inner: Mutex::new(Inner {
                backend,
                read_position: 0,
                unfulfilled_request: false,
            }),
            on_chunk: Mutex::new(None),
        })
    }

    pub fn set_on_chunk(&self, cb: ChunkCallback) {
        *self.on_chunk.lock() = Some(cb);
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.inner.lock().backend, Backend::File(_))
    }

    /// Total bytes currently held by the backend.
    pub fn size(&self) -> u64 {
        let inner = self.inner.lock();
        match &inner.backend {
            Backend::File(f) => f.metadata().map(|m| m.len()).unwrap_or(0),
            Backend::Memory(buf) => buf.len() as u64,
        }
    }

    /// Appends decoded PCM. If a prior read request went unfulfilled for lack
    /// of data, immediately retries it.
    pub fn store_buffer(&self, data: &[u8]) -> Result<()> {
        let retry = {
            let mut inner = self.inner.lock();
            match &mut inner.backend {
                Backend::File(file) => {
                    let end = file
                        .seek(SeekFrom::End(0))
                        .map_err(|e| CacheError::TempFileCreateFailed { reason: e.to_string() })?;
                    let _ = end;
                    file.write_all(data)
                        .map_err(|e| CacheError::TempFileCreateFailed { reason: e.to_string() })?;
                }
                Backend::Memory(buf) => {
                    buf.extend_from_slice(data);
                }
            }
            inner.unfulfilled_request
        };

        if retry {
            self.request_next_pcm_chunk();
        }
        Ok(())
    }

    /// Emits one chunk of `BUFFER_CREATE_MILLISECONDS` worth of PCM starting
    /// at the current read position. If not enough data has arrived yet,
    /// marks the request pending and emits nothing; `store_buffer` retries it
    /// once more data lands.
    pub fn request_next_pcm_chunk(&self) {
        let chunk = {
            let mut inner = self.inner.lock();
            let available = Self::backend_len(&inner.backend);

            if inner.read_position >= available {
                inner.unfulfilled_request = true;
                return;
            }
            inner.unfulfilled_request = false;

            let start_us = self.format.duration_for_bytes(inner.read_position as i64);
            let read_position = inner.read_position;
            let want = self.chunk_bytes.max(0) as u64;

            match &mut inner.backend {
                Backend::File(file) => {
                    let len = want.min(available - read_position);
                    if len == 0 {
                        return;
                    }
                    let mut buf = vec![0u8; len as usize];
                    if file.seek(SeekFrom::Start(read_position)).is_err() {
                        return;
                    }
                    let n = match file.read(&mut buf) {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    buf.truncate(n);
                    inner.read_position += n as u64;
                    PcmChunk::new(buf, start_us, false)
                }
                Backend::Memory(data) => {
                    let len = (want.min(available - read_position)) as usize;
                    if len == 0 {
                        return;
                    }
                    let bytes = data[..len].to_vec();
                    if self.radio_station {
                        data.drain(0..len);
                    } else {
                        inner.read_position += len as u64;
                    }
                    PcmChunk::new(bytes, start_us, false)
                }
            }
        };

        self.emit(chunk);
    }

    /// Seeks the read position to `milliseconds` (clamped into range) and
    /// emits one chunk tagged `from_seek = true`. Not meaningful for radio
    /// streams, which have no addressable past.
    pub fn request_timestamp_pcm_chunk(&self, milliseconds: i64) {
        let chunk = {
            let mut inner = self.inner.lock();
            let available = Self::backend_len(&inner.backend);
            let want = self.chunk_bytes.max(0) as u64;

            let requested = self.format.bytes_for_duration(milliseconds * 1000).max(0) as u64;
            let position = requested.min(available.saturating_sub(want));
            let start_us = self.format.duration_for_bytes(position as i64);

            match &mut inner.backend {
                Backend::File(file) => {
                    let len = want.min(available.saturating_sub(position));
                    if file.seek(SeekFrom::Start(position)).is_err() {
                        return;
                    }
                    let mut buf = vec![0u8; len as usize];
                    let n = match file.read(&mut buf) {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    buf.truncate(n);
                    inner.read_position = position + n as u64;
                    PcmChunk::new(buf, start_us, true)
                }
                Backend::Memory(data) => {
                    let len = (want.min(available.saturating_sub(position))) as usize;
                    let start = position as usize;
                    let bytes = data[start..start + len].to_vec();
                    inner.read_position = position + len as u64;
                    PcmChunk::new(bytes, start_us, true)
                }
            }
        };

        self.emit(chunk);
    }

    fn backend_len(backend: &Backend) -> u64 {
        match backend {
            Backend::File(f) => f.metadata().map(|m| m.len()).unwrap_or(0),
            Backend::Memory(buf) => buf.len() as u64,
        }
    }

    fn emit(&self, chunk: PcmChunk) {
        if let Some(cb) = self.on_chunk.lock().as_mut() {
            cb(chunk);
        }
    }
}

fn available_memory() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/proc/meminfo") {
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    if let Some(kb) = rest.trim().split_whitespace().next() {
                        if let Ok(kb) = kb.parse::<u64>() {
                            return (kb * 1024).min(MAX_PCM_MEMORY_BYTES);
                        }
                    }
                }
            }
        }
    }
    DEFAULT_PCM_MEMORY_BYTES
}

fn create_scratch_file() -> std::io::Result<File> {
    let path = std::env::temp_dir().join(format!("waveloom_{}", uuid::Uuid::new_v4()));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    debug!(path = %path.display(), "created PCM scratch file");
    // best-effort: unlinking immediately would break reopen-by-seek semantics
    // we rely on, so the file is removed by the OS's tmp cleanup instead.
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleType;
    use std::sync::{Arc, Mutex as StdMutex};

    fn test_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channel_count: 2,
            sample_type: SampleType::I16,
        }
    }

    #[test]
    fn short_known_length_uses_memory_backend() {
        let cache = PcmCache::new(test_format(), 1_000, false).unwrap();
        assert!(!cache.is_file_backed());
    }

    #[test]
    fn unknown_length_non_radio_uses_file_backend() {
        let cache = PcmCache::new(test_format(), 0, false).unwrap();
        assert!(cache.is_file_backed());
    }

    #[test]
    fn radio_station_always_uses_memory() {
        let cache = PcmCache::new(test_format(), 0, true).unwrap();
        assert!(!cache.is_file_backed());
    }

    #[test]
    fn request_before_data_sets_pending_and_store_retries_it() {
        let cache = PcmCache::new(test_format(), 1_000, false).unwrap();
        let received: Arc<StdMutex<Vec<PcmChunk>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_cb = Arc::clone(&received);
        cache.set_on_chunk(Box::new(move |chunk| received_cb.lock().unwrap().push(chunk)));

        cache.request_next_pcm_chunk();
        assert!(received.lock().unwrap().is_empty());

        let bytes_needed = test_format().bytes_for_duration(BUFFER_CREATE_MILLISECONDS * 1000) as usize;
        cache.store_buffer(&vec![0u8; bytes_needed]).unwrap();

        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn radio_reads_are_destructive() {
        let cache = PcmCache::new(test_format(), 0, true).unwrap();
        let bytes_needed = test_format().bytes_for_duration(BUFFER_CREATE_MILLISECONDS * 1000) as usize;
        cache.store_buffer(&vec![1u8; bytes_needed * 2]).unwrap();
        assert_eq!(cache.size(), (bytes_needed * 2) as u64);

        let received: Arc<StdMutex<Vec<PcmChunk>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_cb = Arc::clone(&received);
        cache.set_on_chunk(Box::new(move |chunk| received_cb.lock().unwrap().push(chunk)));
        cache.request_next_pcm_chunk();

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(cache.size(), bytes_needed as u64);
    }

    #[test]
    fn timestamp_request_clamps_into_range() {
        let cache = PcmCache::new(test_format(), 10_000, false).unwrap();
        let bytes_needed = test_format().bytes_for_duration(10_000 * 1000) as usize;
        cache.store_buffer(&vec![2u8; bytes_needed]).unwrap();

        let received: Arc<StdMutex<Vec<PcmChunk>>> = Arc::new(StdMutex::new(Vec::new()));
        let received_cb = Arc::clone(&received);
        cache.set_on_chunk(Box::new(move |chunk| received_cb.lock().unwrap().push(chunk)));

        cache.request_timestamp_pcm_chunk(1_000_000);
        let chunks = received.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].from_seek);
    }
}
