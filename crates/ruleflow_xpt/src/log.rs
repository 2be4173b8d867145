//! The checkpoint log.
//!
//! One writer appends at a time; lookups share a read lock and never see a
//! record before its index entry is published under the write lock.

use ruleflow_core::{CoreError, CoreResult, Sequence};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::buffer::BinaryData;
use crate::config::{FlushPolicy, XptConfig};
use crate::index::{KeyIndex, Location};
use crate::record::{self, Persistence};
use crate::storage::{FileStorage, LogStorage};

/// Checkpoint log statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XptStats {
    /// Records found on open
    pub records_replayed: u64,
    /// Records appended since open
    pub records_written: u64,
    /// Bytes cut from a damaged tail on open
    pub bytes_truncated: u64,
    /// Keys currently indexed
    pub index_entries: usize,
    /// Index bound
    pub index_capacity: usize,
    /// Keys evicted from the index
    pub evictions: u64,
    /// Lookups served
    pub lookups: u64,
    /// Full log scans after an index miss
    pub scans: u64,
    /// Log length in bytes
    pub log_bytes: u64,
    /// Sequence number of the next record
    pub next_sequence: u64,
}

struct LogState<S> {
    storage: S,
    index: KeyIndex,
    next_sequence: Sequence,
    unflushed: u32,
    records_replayed: u64,
    records_written: u64,
    bytes_truncated: u64,
}

impl<S: LogStorage> LogState<S> {
    /// Forward scan for the newest record with `key`
    fn scan_for(&self, key: &[u8]) -> CoreResult<Option<Location>> {
        let end = self.storage.len();
        let mut offset = 0u64;
        let mut found: Option<Location> = None;

        while offset < end {
            let (header, frame) =
                record::read_frame(&self.storage, offset, end).map_err(|e| e.at(offset))?;
            if record::frame_key(&header, &frame) == key
                && found.is_none_or(|loc| header.sequence >= loc.sequence)
            {
                found = Some(Location {
                    offset,
                    len: header.frame_len(),
                    sequence: header.sequence,
                });
            }
            offset += header.frame_len();
        }
        Ok(found)
    }

    fn locate(&self, key: &[u8], scans: &AtomicU64) -> CoreResult<Option<Location>> {
        if let Some(location) = self.index.get(key) {
            return Ok(Some(location));
        }
        if !self.index.has_spilled() {
            return Ok(None);
        }
        scans.fetch_add(1, Ordering::Relaxed);
        warn!(key_len = key.len(), "index miss, scanning log");
        self.scan_for(key)
    }

    fn read_value(&self, location: Location) -> CoreResult<BinaryData> {
        let end = location.offset + location.len;
        let (header, frame) = record::read_frame(&self.storage, location.offset, end)
            .map_err(|e| e.at(location.offset))?;
        Ok(BinaryData::new(record::frame_into_value(&header, frame)))
    }

    /// Put a scanned location back in the index
    ///
    /// Skipped if anything was written after the scan: that record may be a
    /// newer one for `key`, possibly evicted again already.
    fn readmit(
        &mut self,
        key: &[u8],
        location: Location,
        scanned_at: Sequence,
    ) -> CoreResult<bool> {
        if self.next_sequence != scanned_at {
            return Ok(false);
        }
        self.index.insert(key.to_vec(), location)?;
        Ok(true)
    }

    /// Drop the unacknowledged record starting at `offset`
    fn rollback(&mut self, offset: u64) {
        if let Err(e) = self.storage.truncate(offset) {
            warn!(offset, error = %e, "rollback of unacknowledged record failed");
        }
        self.unflushed = self.unflushed.saturating_sub(1);
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.storage
            .flush()
            .map_err(|e| CoreError::io("flush checkpoint log", e))?;
        self.unflushed = 0;
        Ok(())
    }
}

/// Durable key/value checkpoint log
///
/// Generic over its storage so tests can run against [`MemStorage`](crate::MemStorage)
/// and simulate crashes.
pub struct Checkpoint<S: LogStorage = FileStorage> {
    config: XptConfig,
    state: RwLock<LogState<S>>,
    lookups: AtomicU64,
    scans: AtomicU64,
}

impl<S: LogStorage> std::fmt::Debug for Checkpoint<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("config", &self.config)
            .field("lookups", &self.lookups)
            .field("scans", &self.scans)
            .finish_non_exhaustive()
    }
}

impl Checkpoint<FileStorage> {
    /// Create or reopen the log file named by `config.path`
    ///
    /// # Errors
    ///
    /// Returns `Command` for an invalid config, or the I/O error if the file
    /// cannot be opened or replayed
    pub fn open(config: XptConfig) -> CoreResult<Self> {
        config.validate()?;
        let storage = FileStorage::open(&config.path)
            .map_err(|e| CoreError::io(format!("open {}", config.path.display()), e))?;
        Self::open_with_storage(config, storage)
    }
}

impl<S: LogStorage> Checkpoint<S> {
    /// Open a log over existing storage, replaying whatever it holds
    ///
    /// Records are applied in sequence order. A damaged tail (a record cut
    /// short by a crash, or one failing its checksum) is truncated away.
    ///
    /// # Errors
    ///
    /// Returns `Command` for an invalid config, or the I/O error if storage
    /// cannot be read or truncated
    pub fn open_with_storage(config: XptConfig, mut storage: S) -> CoreResult<Self> {
        config.validate()?;

        let mut index = KeyIndex::new(config.max_index_entries);
        let end = storage.len();
        let mut offset = 0u64;
        let mut replayed = 0u64;
        let mut last = Sequence::zero();

        while offset < end {
            match record::read_frame(&storage, offset, end) {
                Ok((header, frame)) => {
                    let key = record::frame_key(&header, &frame).to_vec();
                    let location = Location {
                        offset,
                        len: header.frame_len(),
                        sequence: header.sequence,
                    };
                    index.insert(key, location)?;
                    last = last.max(header.sequence);
                    replayed += 1;
                    offset += header.frame_len();
                }
                Err(e) if e.is_damage() => {
                    warn!(offset, end, error = %e, "truncating damaged checkpoint tail");
                    storage
                        .truncate(offset)
                        .map_err(|e| CoreError::io("truncate checkpoint tail", e))?;
                    break;
                }
                Err(e) => return Err(e.at(offset)),
            }
        }

        let bytes_truncated = end - offset.min(end);
        info!(
            path = %config.path.display(),
            records = replayed,
            indexed = index.len(),
            bytes_truncated,
            "checkpoint log opened"
        );

        Ok(Self {
            config,
            state: RwLock::new(LogState {
                storage,
                index,
                next_sequence: last.next(),
                unflushed: 0,
                records_replayed: replayed,
                records_written: 0,
                bytes_truncated,
            }),
            lookups: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        })
    }

    fn read(&self) -> CoreResult<RwLockReadGuard<'_, LogState<S>>> {
        self.state.read().map_err(|_| CoreError::Internal {
            message: "checkpoint lock poisoned".to_string(),
        })
    }

    fn write_state(&self) -> CoreResult<RwLockWriteGuard<'_, LogState<S>>> {
        self.state.write().map_err(|_| CoreError::Internal {
            message: "checkpoint lock poisoned".to_string(),
        })
    }

    /// Append a record
    ///
    /// With `allow_replace == false` an existing key fails with
    /// `DoubleWrite` and nothing is appended. A `Persist` record is synced
    /// before this returns; if the sync fails the call fails, the index is
    /// left pointing at the previous value and the record is rolled back. A
    /// flush triggered by the flush policy fails the same way.
    ///
    /// # Errors
    ///
    /// `DoubleWrite`, `Command` for oversized keys/values, `OutOfMemory`, or
    /// the storage I/O error
    pub fn write(
        &self,
        key: &[u8],
        value: &[u8],
        persistence: Persistence,
        allow_replace: bool,
    ) -> CoreResult<Sequence> {
        let mut state = self.write_state()?;

        if !allow_replace {
            let exists = state.index.contains(key)
                || (state.index.has_spilled() && state.scan_for(key)?.is_some());
            if exists {
                return Err(CoreError::double_write("Checkpoint key", key_repr(key)));
            }
        }

        let sequence = state.next_sequence;
        let frame = record::encode_frame(key, value, persistence, allow_replace, sequence)?;
        // Sequence numbers are never reused, even if this append is rolled back.
        state.next_sequence = sequence.next();

        let offset = state
            .storage
            .append(&frame)
            .map_err(|e| CoreError::io("append checkpoint record", e))?;
        state.unflushed += 1;

        // The record counts only once its barrier succeeds; on failure it is
        // cut from storage so neither a scan nor a replay can see it.
        let barrier = match (persistence, self.config.flush_policy) {
            (Persistence::Persist, _) => {
                Some(("sync persistent checkpoint record", state.storage.sync()))
            }
            (Persistence::Transient, FlushPolicy::AlwaysFlush) => {
                Some(("flush checkpoint log", state.storage.flush()))
            }
            (Persistence::Transient, FlushPolicy::Periodic(n)) if state.unflushed >= n => {
                Some(("flush checkpoint log", state.storage.flush()))
            }
            (Persistence::Transient, _) => None,
        };
        match barrier {
            Some((operation, Err(e))) => {
                state.rollback(offset);
                return Err(CoreError::io(operation, e));
            }
            Some((_, Ok(()))) => state.unflushed = 0,
            None => {}
        }

        let location = Location {
            offset,
            len: frame.len() as u64,
            sequence,
        };
        if let Some(evicted) = state.index.insert(key.to_vec(), location)? {
            debug!(evicted = %key_repr(&evicted), "index full, evicted least recently used key");
        }
        state.records_written += 1;

        debug!(
            %sequence,
            offset,
            key_len = key.len(),
            value_len = value.len(),
            ?persistence,
            "checkpoint record appended"
        );
        Ok(sequence)
    }

    /// Most recent value stored under `key`
    ///
    /// The returned buffer is an independent copy owned by the caller.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key was never written, `Corrupt` or an I/O error if
    /// the record cannot be read back
    pub fn lookup(&self, key: &[u8]) -> CoreResult<BinaryData> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let (data, readmit) = {
            let state = self.read()?;
            let indexed = state.index.contains(key);
            let location = state
                .locate(key, &self.scans)?
                .ok_or_else(|| CoreError::not_found("Checkpoint key", key_repr(key)))?;
            let scanned_at = state.next_sequence;
            (
                state.read_value(location)?,
                (!indexed).then_some((location, scanned_at)),
            )
        };

        if let Some((location, scanned_at)) = readmit {
            self.write_state()?.readmit(key, location, scanned_at)?;
        }
        Ok(data)
    }

    /// Check if `key` has a record
    ///
    /// # Errors
    ///
    /// Returns an error if a fallback scan cannot read the log
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        let state = self.read()?;
        Ok(state.locate(key, &self.scans)?.is_some())
    }

    /// Push buffered records to storage
    ///
    /// # Errors
    ///
    /// Returns the storage I/O error
    pub fn flush(&self) -> CoreResult<()> {
        self.write_state()?.flush()
    }

    /// Flush and sync everything written so far
    ///
    /// # Errors
    ///
    /// Returns the storage I/O error
    pub fn sync(&self) -> CoreResult<()> {
        let mut state = self.write_state()?;
        state
            .storage
            .sync()
            .map_err(|e| CoreError::io("sync checkpoint log", e))?;
        state.unflushed = 0;
        Ok(())
    }

    /// Flush, sync and release the log
    ///
    /// # Errors
    ///
    /// Returns the storage I/O error; the log is released either way
    pub fn close(self) -> CoreResult<()> {
        self.sync()?;
        info!(path = %self.config.path.display(), "checkpoint log closed");
        Ok(())
    }

    /// Give up the log without flushing, returning its storage
    ///
    /// Records still buffered in the log are exactly what a crash at this
    /// point would lose.
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned
    pub fn into_storage(self) -> CoreResult<S> {
        let state = self.state.into_inner().map_err(|_| CoreError::Internal {
            message: "checkpoint lock poisoned".to_string(),
        })?;
        Ok(state.storage)
    }

    /// Configuration the log was opened with
    #[must_use]
    pub fn config(&self) -> &XptConfig {
        &self.config
    }

    /// Snapshot of log statistics
    ///
    /// # Errors
    ///
    /// Returns an error if the state lock is poisoned
    pub fn stats(&self) -> CoreResult<XptStats> {
        let state = self.read()?;
        Ok(XptStats {
            records_replayed: state.records_replayed,
            records_written: state.records_written,
            bytes_truncated: state.bytes_truncated,
            index_entries: state.index.len(),
            index_capacity: state.index.capacity(),
            evictions: state.index.evictions(),
            lookups: self.lookups.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            log_bytes: state.storage.len(),
            next_sequence: state.next_sequence.as_u64(),
        })
    }
}

/// Printable form of a key for errors and logs
fn key_repr(bytes: &[u8]) -> String {
    const MAX_SHOWN: usize = 32;
    if bytes.len() > MAX_SHOWN {
        format!("{}...", hex::encode(&bytes[..MAX_SHOWN]))
    } else {
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use proptest::prelude::*;
    use ruleflow_core::ErrorKind;
    use std::sync::Arc;

    fn mem_log(policy: FlushPolicy, max_index: usize) -> Checkpoint<MemStorage> {
        let config = XptConfig::default()
            .with_flush_policy(policy)
            .with_max_index_entries(max_index);
        Checkpoint::open_with_storage(config, MemStorage::new()).unwrap()
    }

    fn reopen(storage: MemStorage, max_index: usize) -> Checkpoint<MemStorage> {
        let config = XptConfig::default().with_max_index_entries(max_index);
        Checkpoint::open_with_storage(config, storage).unwrap()
    }

    /// Small xorshift generator so payloads are reproducible
    struct Rng(u64);

    impl Rng {
        fn fill(&mut self, buf: &mut [u8]) {
            for b in buf {
                self.0 ^= self.0 << 13;
                self.0 ^= self.0 >> 7;
                self.0 ^= self.0 << 17;
                *b = self.0 as u8;
            }
        }
    }

    #[test]
    fn test_write_lookup() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        let seq = log.write(b"key", b"value", Persistence::Transient, false).unwrap();
        assert_eq!(seq.as_u64(), 1);
        assert_eq!(log.lookup(b"key").unwrap().as_slice(), b"value");
    }

    #[test]
    fn test_lookup_missing() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        let err = log.lookup(b"nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_double_write_rejected() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"k", b"v1", Persistence::Transient, false).unwrap();
        let before = log.stats().unwrap().log_bytes;

        let err = log.write(b"k", b"v2", Persistence::Transient, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleWrite);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"v1");
        assert_eq!(log.stats().unwrap().log_bytes, before);
    }

    #[test]
    fn test_last_writer_wins() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"k", b"v1", Persistence::Transient, true).unwrap();
        log.write(b"k", b"v2", Persistence::Transient, true).unwrap();
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"v2");
    }

    #[test]
    fn test_empty_value_round_trip() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"empty", b"", Persistence::Persist, false).unwrap();
        let data = log.lookup(b"empty").unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_large_value_round_trip() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        let mut value = vec![0u8; 1 << 20];
        Rng(7).fill(&mut value);
        log.write(b"big", &value, Persistence::Persist, false).unwrap();
        assert_eq!(log.lookup(b"big").unwrap().into_vec(), value);
    }

    #[test]
    fn test_persist_survives_crash() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"durable", b"yes", Persistence::Persist, false).unwrap();
        log.write(b"volatile", b"maybe", Persistence::Transient, false).unwrap();

        let image = log.into_storage().unwrap().crash();
        let log = reopen(image, 16);
        assert_eq!(log.lookup(b"durable").unwrap().as_slice(), b"yes");
        assert_eq!(log.lookup(b"volatile").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_always_flush_survives_crash() {
        let log = mem_log(FlushPolicy::AlwaysFlush, 16);
        log.write(b"t", b"1", Persistence::Transient, false).unwrap();
        let log = reopen(log.into_storage().unwrap().crash(), 16);
        assert_eq!(log.lookup(b"t").unwrap().as_slice(), b"1");
    }

    #[test]
    fn test_periodic_flush() {
        let log = mem_log(FlushPolicy::Periodic(3), 16);
        for i in 0..4u8 {
            log.write(&[i], &[i], Persistence::Transient, false).unwrap();
        }
        // Records 0..3 were flushed together, record 3 is still buffered.
        let log = reopen(log.into_storage().unwrap().crash(), 16);
        for i in 0..3u8 {
            assert_eq!(log.lookup(&[i]).unwrap().as_slice(), &[i]);
        }
        assert!(log.lookup(&[3]).is_err());
    }

    #[test]
    fn test_sync_survives_power_loss() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"a", b"1", Persistence::Transient, false).unwrap();
        log.sync().unwrap();

        let log = reopen(log.into_storage().unwrap().power_loss(), 16);
        assert_eq!(log.lookup(b"a").unwrap().as_slice(), b"1");
    }

    #[test]
    fn test_failed_persist_is_not_acknowledged() {
        let storage = MemStorage::new();
        let fault = storage.sync_fault();
        let log = Checkpoint::open_with_storage(XptConfig::default(), storage).unwrap();
        log.write(b"k", b"old", Persistence::Persist, true).unwrap();

        fault.store(true, Ordering::SeqCst);
        let err = log.write(b"k", b"new", Persistence::Persist, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"old");

        fault.store(false, Ordering::SeqCst);
        log.write(b"other", b"x", Persistence::Persist, false).unwrap();
        let log = reopen(log.into_storage().unwrap().power_loss(), 16);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"old");
        assert_eq!(log.lookup(b"other").unwrap().as_slice(), b"x");
    }

    #[test]
    fn test_failed_flush_is_rolled_back() {
        let storage = MemStorage::new();
        let fault = storage.flush_fault();
        let config = XptConfig::default().with_flush_policy(FlushPolicy::AlwaysFlush);
        let log = Checkpoint::open_with_storage(config, storage).unwrap();
        log.write(b"k", b"old", Persistence::Transient, true).unwrap();
        let len_before = log.stats().unwrap().log_bytes;

        fault.store(true, Ordering::SeqCst);
        let err = log.write(b"k", b"new", Persistence::Transient, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(log.stats().unwrap().log_bytes, len_before);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"old");

        fault.store(false, Ordering::SeqCst);
        log.sync().unwrap();
        let log = reopen(log.into_storage().unwrap().power_loss(), 16);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"old");
    }

    #[test]
    fn test_failed_flush_allows_retry_without_replace() {
        let storage = MemStorage::new();
        let fault = storage.flush_fault();
        let config = XptConfig::default()
            .with_flush_policy(FlushPolicy::AlwaysFlush)
            .with_max_index_entries(1);
        let log = Checkpoint::open_with_storage(config, storage).unwrap();
        log.write(b"a", b"1", Persistence::Transient, false).unwrap();
        log.write(b"b", b"2", Persistence::Transient, false).unwrap();

        fault.store(true, Ordering::SeqCst);
        assert!(log.write(b"c", b"3", Persistence::Transient, false).is_err());
        fault.store(false, Ordering::SeqCst);

        // The failed record is gone, so a fallback scan does not find it.
        assert!(!log.contains(b"c").unwrap());
        log.write(b"c", b"3", Persistence::Transient, false).unwrap();
        assert_eq!(log.lookup(b"c").unwrap().as_slice(), b"3");
    }

    #[test]
    fn test_stale_scan_not_readmitted() {
        let log = mem_log(FlushPolicy::NoFlush, 1);
        log.write(b"k", b"v1", Persistence::Transient, true).unwrap();
        log.write(b"a", b"x", Persistence::Transient, true).unwrap();

        // Scan finds v1; a newer record lands and is evicted before the
        // lookup takes the write lock to re-admit.
        let (location, scanned_at) = {
            let state = log.read().unwrap();
            (state.scan_for(b"k").unwrap().unwrap(), state.next_sequence)
        };
        log.write(b"k", b"v2", Persistence::Transient, true).unwrap();
        log.write(b"a", b"y", Persistence::Transient, true).unwrap();
        let readmitted = log
            .write_state()
            .unwrap()
            .readmit(b"k", location, scanned_at)
            .unwrap();
        assert!(!readmitted);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"v2");
    }

    #[test]
    fn test_lookups_never_go_backwards_with_tiny_index() {
        let log = Arc::new(mem_log(FlushPolicy::NoFlush, 1));
        log.write(b"k", &0u32.to_le_bytes(), Persistence::Transient, true).unwrap();
        const ROUNDS: u32 = 500;

        let writer = {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 1..=ROUNDS {
                    log.write(b"k", &i.to_le_bytes(), Persistence::Transient, true).unwrap();
                    log.write(b"other", b"evict", Persistence::Transient, true).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    let mut last = 0u32;
                    for _ in 0..ROUNDS {
                        let data = log.lookup(b"k").unwrap();
                        let mut raw = [0u8; 4];
                        raw.copy_from_slice(data.as_slice());
                        let seen = u32::from_le_bytes(raw);
                        assert!(seen >= last, "value went back from {} to {}", last, seen);
                        last = seen;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        for _ in 0..3 {
            assert_eq!(log.lookup(b"k").unwrap().as_slice(), &ROUNDS.to_le_bytes());
        }
    }

    #[test]
    fn test_recovery_rebuilds_index() {
        let log = mem_log(FlushPolicy::NoFlush, 64);
        for i in 0..50u32 {
            let value = format!("value-{}", i);
            log.write(&i.to_le_bytes(), value.as_bytes(), Persistence::Persist, false)
                .unwrap();
        }
        let log = reopen(log.into_storage().unwrap().power_loss(), 64);
        let stats = log.stats().unwrap();
        assert_eq!(stats.records_replayed, 50);
        assert_eq!(stats.next_sequence, 51);
        for i in 0..50u32 {
            let expected = format!("value-{}", i);
            assert_eq!(log.lookup(&i.to_le_bytes()).unwrap().as_slice(), expected.as_bytes());
        }
    }

    #[test]
    fn test_recovery_last_writer_wins_across_restarts() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"k", b"first", Persistence::Persist, true).unwrap();
        let log = reopen(log.into_storage().unwrap(), 16);
        log.write(b"k", b"second", Persistence::Persist, true).unwrap();
        let log = reopen(log.into_storage().unwrap(), 16);

        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"second");
        assert_eq!(log.stats().unwrap().next_sequence, 3);
    }

    #[test]
    fn test_recovery_truncates_torn_tail() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"good", b"1", Persistence::Persist, false).unwrap();
        let good_len = log.stats().unwrap().log_bytes;
        log.write(b"torn", b"2", Persistence::Persist, false).unwrap();

        let storage = log.into_storage().unwrap();
        let mut bytes = storage.bytes().to_vec();
        bytes.truncate(bytes.len() - 3);

        let log = reopen(MemStorage::from_bytes(bytes), 16);
        let stats = log.stats().unwrap();
        assert_eq!(stats.records_replayed, 1);
        assert_eq!(stats.log_bytes, good_len);
        assert!(stats.bytes_truncated > 0);
        assert_eq!(log.lookup(b"good").unwrap().as_slice(), b"1");
        assert!(log.lookup(b"torn").is_err());

        // Appends continue cleanly after the cut.
        log.write(b"next", b"3", Persistence::Persist, false).unwrap();
        let log = reopen(log.into_storage().unwrap(), 16);
        assert_eq!(log.lookup(b"next").unwrap().as_slice(), b"3");
    }

    #[test]
    fn test_evicted_key_found_by_scan() {
        let log = mem_log(FlushPolicy::NoFlush, 2);
        log.write(b"a", b"1", Persistence::Transient, false).unwrap();
        log.write(b"b", b"2", Persistence::Transient, false).unwrap();
        log.write(b"c", b"3", Persistence::Transient, false).unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.index_entries, 2);
        assert_eq!(stats.evictions, 1);

        assert_eq!(log.lookup(b"a").unwrap().as_slice(), b"1");
        assert_eq!(log.stats().unwrap().scans, 1);
        // Re-admitted, so the next lookup hits the index.
        assert_eq!(log.lookup(b"a").unwrap().as_slice(), b"1");
        assert_eq!(log.stats().unwrap().scans, 1);
    }

    #[test]
    fn test_double_write_detected_for_evicted_key() {
        let log = mem_log(FlushPolicy::NoFlush, 1);
        log.write(b"a", b"1", Persistence::Transient, false).unwrap();
        log.write(b"b", b"2", Persistence::Transient, false).unwrap();
        let err = log.write(b"a", b"again", Persistence::Transient, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DoubleWrite);
        assert_eq!(log.lookup(b"a").unwrap().as_slice(), b"1");
    }

    #[test]
    fn test_replay_with_small_index_keeps_newest_value() {
        let log = mem_log(FlushPolicy::NoFlush, 64);
        log.write(b"k", b"old", Persistence::Transient, true).unwrap();
        for i in 0..10u8 {
            log.write(&[i], &[i], Persistence::Transient, false).unwrap();
        }
        log.write(b"k", b"new", Persistence::Persist, true).unwrap();

        let log = reopen(log.into_storage().unwrap(), 3);
        assert_eq!(log.lookup(b"k").unwrap().as_slice(), b"new");
        assert_eq!(log.lookup(&[0]).unwrap().as_slice(), &[0]);
    }

    #[test]
    fn test_contains() {
        let log = mem_log(FlushPolicy::NoFlush, 16);
        log.write(b"x", b"1", Persistence::Transient, false).unwrap();
        assert!(log.contains(b"x").unwrap());
        assert!(!log.contains(b"y").unwrap());
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let config = XptConfig::default().with_max_index_entries(0);
        let err = Checkpoint::open_with_storage(config, MemStorage::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Command);
    }

    #[test]
    fn test_file_log_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = XptConfig::new(dir.path().join("ckpt.xpt"));

        let log = Checkpoint::open(config.clone()).unwrap();
        log.write(b"persisted", b"1", Persistence::Persist, false).unwrap();
        log.write(b"buffered", b"2", Persistence::Transient, false).unwrap();
        log.close().unwrap();

        let log = Checkpoint::open(config).unwrap();
        assert_eq!(log.lookup(b"persisted").unwrap().as_slice(), b"1");
        assert_eq!(log.lookup(b"buffered").unwrap().as_slice(), b"2");
        assert_eq!(log.stats().unwrap().records_replayed, 2);
    }

    #[test]
    fn test_rank_keyed_workload() {
        // 100 records per rank keyed `rank + repeat * world_size`, as a
        // worker in a multi-rank run would write them.
        let dir = tempfile::tempdir().unwrap();
        let config = XptConfig::new(dir.path().join("checkpoint-1.xpt"));
        let log = Checkpoint::open(config.clone()).unwrap();

        let world_size = 4i32;
        let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
        let mut written = Vec::new();
        for rank in 0..world_size {
            for repeat in 0..100i32 {
                let key = (rank + repeat * world_size).to_le_bytes();
                let mut data = [0u8; 128];
                rng.fill(&mut data);

                log.write(&key, &data, Persistence::Persist, true).unwrap();
                let retrieved = log.lookup(&key).unwrap();
                assert_eq!(retrieved.len(), data.len());
                assert_eq!(retrieved.as_slice(), &data);
                retrieved.release();
                written.push((key, data));
            }
        }

        for (key, data) in &written {
            assert_eq!(log.lookup(key).unwrap().as_slice(), data);
        }
        log.close().unwrap();

        let log = Checkpoint::open(config).unwrap();
        for (key, data) in &written {
            assert_eq!(log.lookup(key).unwrap().as_slice(), data);
        }
    }

    #[test]
    fn test_concurrent_lookups_during_writes() {
        let log = Arc::new(mem_log(FlushPolicy::NoFlush, 1024));
        for i in 0..64u32 {
            log.write(&i.to_le_bytes(), &[0u8; 32], Persistence::Transient, true)
                .unwrap();
        }

        let writer = {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for round in 1..=20u8 {
                    for i in 0..64u32 {
                        log.write(&i.to_le_bytes(), &[round; 32], Persistence::Transient, true)
                            .unwrap();
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        for i in (0..64u32).step_by(7) {
                            let data = log.lookup(&i.to_le_bytes()).unwrap();
                            // Never a torn mix of two rounds.
                            assert!(data.iter().all(|b| *b == data[0]));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(log.lookup(&0u32.to_le_bytes()).unwrap().as_slice(), &[20u8; 32]);
    }

    #[test]
    fn test_key_repr() {
        assert_eq!(key_repr(&[0x01, 0xab]), "01ab");
        assert!(key_repr(&[0u8; 40]).ends_with("..."));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip_arbitrary_bytes(
            key in prop::collection::vec(any::<u8>(), 0..48),
            value in prop::collection::vec(any::<u8>(), 0..4096),
        ) {
            let log = mem_log(FlushPolicy::NoFlush, 8);
            log.write(&key, &value, Persistence::Transient, false).unwrap();
            prop_assert_eq!(log.lookup(&key).unwrap().into_vec(), value);
        }

        #[test]
        fn prop_last_writer_wins_after_replay(
            writes in prop::collection::vec(
                (0u8..8, prop::collection::vec(any::<u8>(), 0..32)),
                1..60,
            ),
            max_index in 1usize..6,
        ) {
            let log = mem_log(FlushPolicy::NoFlush, max_index);
            let mut model = std::collections::BTreeMap::new();
            for (k, v) in &writes {
                log.write(&[*k], v, Persistence::Persist, true).unwrap();
                model.insert(*k, v.clone());
            }
            for (k, v) in &model {
                let found = log.lookup(&[*k]).unwrap();
                prop_assert_eq!(found.as_slice(), v.as_slice());
            }

            let log = reopen(log.into_storage().unwrap().power_loss(), max_index);
            for (k, v) in &model {
                let found = log.lookup(&[*k]).unwrap();
                prop_assert_eq!(found.as_slice(), v.as_slice());
            }
        }
    }
}
