//! The log store: a ring of segments, an admission loop, and the I/O worker.
//!
//! Writers arbitrate for buffer space purely through each segment's control
//! word and block only when every segment in the ring is full. The single
//! I/O worker walks the ring in order, appending sealed buffers to the log
//! file and fsyncing, so LSN order and file order coincide. A record is
//! durable once [`LogStore::persistent_lsn`] covers its end LSN.
//!
//! The on-disk layout is the unframed concatenation of segment buffers;
//! each record inside is a u32-LE length-prefixed byte string.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{error, warn};

use ember_common::codec;
use ember_common::error::{EmberError, EmberResult};
use ember_common::types::{Lsn, LsnRange};

use crate::config::WalConfig;
use crate::segment::{Admission, LogSegment, SegmentState};

/// A durable, append-only log store.
pub struct LogStore {
    config: WalConfig,
    segments: Box<[LogSegment]>,
    /// Index of the segment currently admitting writers.
    current: AtomicUsize,
    file: Mutex<File>,
    persistent_lsn: AtomicU64,
    durable_lock: Mutex<()>,
    durable_cv: Condvar,
    io_lock: Mutex<()>,
    io_cv: Condvar,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogStore {
    /// Opens a store rooted at `config.dir`, creating the directory and a
    /// fresh log file, and starts the I/O worker.
    pub fn open(config: WalConfig) -> EmberResult<Arc<Self>> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(config.log_path())?;

        let segments: Box<[LogSegment]> = (0..config.segment_num)
            .map(|_| LogSegment::new(config.segment_size))
            .collect();
        segments[0].open_at(Lsn::ZERO);

        let store = Arc::new(Self {
            config,
            segments,
            current: AtomicUsize::new(0),
            file: Mutex::new(file),
            persistent_lsn: AtomicU64::new(0),
            durable_lock: Mutex::new(()),
            durable_cv: Condvar::new(),
            io_lock: Mutex::new(()),
            io_cv: Condvar::new(),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        // Everything above must be visible to the worker thread.
        std::sync::atomic::fence(Ordering::SeqCst);

        let weak = Arc::downgrade(&store);
        let handle = thread::Builder::new()
            .name("ember-wal-io".into())
            .spawn(move || io_loop(&weak))?;
        *store.worker.lock() = Some(handle);

        Ok(store)
    }

    /// Appends a batch of records, reserving space for the whole batch with
    /// one admission. Returns the LSN range of each record (length prefix
    /// included); ranges of one batch are contiguous.
    pub fn append_log_record(&self, records: &[Bytes]) -> EmberResult<Vec<LsnRange>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let total: usize = records
            .iter()
            .map(|record| codec::len_prefixed_size(record.len()))
            .sum();
        if total > self.config.segment_size {
            warn!(
                total,
                segment_size = self.config.segment_size,
                "log batch larger than a segment"
            );
            return Err(EmberError::invalid_argument(
                "log batch exceeds segment size",
            ));
        }

        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Err(EmberError::Closed);
            }
            let idx = self.current.load(Ordering::Acquire);
            let segment = &self.segments[idx];
            if segment.state() != SegmentState::Open {
                // The previous sealer is still opening the next segment.
                thread::yield_now();
                continue;
            }
            match segment.try_acquire(total) {
                Admission::Grant(mut guard) => {
                    let mut ranges = Vec::with_capacity(records.len());
                    let mut lsn = guard.start_lsn();
                    for record in records {
                        guard.write(&(record.len() as u32).to_le_bytes());
                        guard.write(record);
                        let end = lsn.advance(codec::len_prefixed_size(record.len()) as u64);
                        ranges.push(LsnRange::new(lsn, end));
                        lsn = end;
                    }
                    return Ok(ranges);
                }
                Admission::SealAndRetry => {
                    self.seal_and_open(idx);
                }
                Admission::WaitRetry => {
                    thread::yield_now();
                }
            }
        }
    }

    /// LSN up to which the log is known durable: the end of the last
    /// fsynced segment.
    #[must_use]
    pub fn persistent_lsn(&self) -> Lsn {
        Lsn::new(self.persistent_lsn.load(Ordering::Acquire))
    }

    /// Blocks until `persistent_lsn() >= lsn` (or the store stops).
    ///
    /// The I/O worker seals slow-filling segments every flush interval, so
    /// the wait is bounded for any LSN that has been reserved.
    pub fn wait_for_persistent(&self, lsn: Lsn) {
        if !lsn.is_valid() {
            return;
        }
        let mut guard = self.durable_lock.lock();
        while self.persistent_lsn() < lsn {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            self.durable_cv
                .wait_for(&mut guard, self.config.flush_interval);
        }
    }

    /// Seals the open segment, drains the ring to disk, and stops the I/O
    /// worker. Callers must have stopped appending.
    pub fn close(&self) -> EmberResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        // Push buffered records toward the file.
        let idx = self.current.load(Ordering::Acquire);
        self.seal_and_open(idx);

        // Wait until every segment has either been flushed or never held
        // bytes.
        loop {
            let quiescent = self.segments.iter().all(|segment| match segment.state() {
                SegmentState::Free => true,
                SegmentState::Open => segment.is_clean(),
                SegmentState::Io => false,
            });
            if quiescent {
                break;
            }
            self.io_cv.notify_all();
            thread::sleep(std::time::Duration::from_millis(1));
        }

        self.stopped.store(true, Ordering::Release);
        self.io_cv.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        {
            let _guard = self.durable_lock.lock();
        }
        self.durable_cv.notify_all();
        Ok(())
    }

    /// Returns true once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Seals `segments[idx]` and, on success, opens the next ring slot at
    /// the sealed segment's end LSN. The successful sealer is the only
    /// opener, so start LSNs chain contiguously across segments.
    fn seal_and_open(&self, idx: usize) -> bool {
        let segment = &self.segments[idx];
        if segment.state() != SegmentState::Open {
            return false;
        }
        let Some(end_lsn) = segment.try_seal() else {
            return false;
        };

        let next_idx = (idx + 1) % self.segments.len();
        let next = &self.segments[next_idx];
        // Writers block here only when every segment in the ring is full.
        while next.state() != SegmentState::Free {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            thread::yield_now();
        }
        next.open_at(end_lsn);
        self.current.store(next_idx, Ordering::Release);
        true
    }

    /// One worker step at ring position `cursor`: flush an `Io` segment, or
    /// wait out the flush interval and seal a slow-filling one.
    fn io_step(&self, cursor: &mut usize) {
        let segment = &self.segments[*cursor];
        if segment.state() == SegmentState::Io {
            self.flush_segment(segment);
            *cursor = (*cursor + 1) % self.segments.len();
            return;
        }

        {
            let mut guard = self.io_lock.lock();
            self.io_cv
                .wait_for(&mut guard, self.config.flush_interval);
        }

        // Bound the latency of a segment that is filling slowly. A clean
        // segment has nothing worth making durable.
        let segment = &self.segments[*cursor];
        if segment.state() == SegmentState::Open && segment.reserved_len() > 0 {
            self.seal_and_open(*cursor);
        }
    }

    /// Appends a sealed segment's buffer to the log file and fsyncs.
    /// I/O failure here is fatal: continuing would silently drop acknowledged
    /// records.
    fn flush_segment(&self, segment: &LogSegment) {
        let end = segment.start_lsn().advance(segment.reserved_len() as u64);
        {
            let mut file = self.file.lock();
            // Safety: the segment is in the Io state; all writers have left.
            let data = unsafe { segment.frozen_bytes() };
            if let Err(err) = file.write_all(data).and_then(|()| file.sync_data()) {
                error!(%err, "wal append/fsync failed");
                std::process::abort();
            }
        }
        self.persistent_lsn.store(end.as_u64(), Ordering::Release);
        segment.mark_free();
        {
            let _guard = self.durable_lock.lock();
        }
        self.durable_cv.notify_all();
    }
}

/// The I/O worker loop. Holds only a weak handle so an abandoned store can
/// shut its worker down; `close` is still the orderly path.
fn io_loop(store: &Weak<LogStore>) {
    let mut cursor = 0usize;
    loop {
        let Some(store) = store.upgrade() else {
            return;
        };
        if store.stopped.load(Ordering::Acquire) {
            // Orderly close drained the ring before setting the flag;
            // flush whatever still landed in Io state.
            while store.segments[cursor].state() == SegmentState::Io {
                store.flush_segment(&store.segments[cursor]);
                cursor = (cursor + 1) % store.segments.len();
            }
            return;
        }
        store.io_step(&mut cursor);
    }
}
