use std::{
    mem,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info};

use crate::{
    buffer::FlushObserver,
    config::LogConfig,
    error::{ErrorKind, SmallError},
    io::{Decodeable, Encodeable, SmallFile},
    tx_log::header::{LogHeader, LOG_HEADER_SIZE},
    types::{Lsn, PageID, SmallResult},
    utils::HandyMutex,
};

/// Snapshot of the log counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounters {
    pub lsn: Lsn,
    pub flushed_lsn: Lsn,
    pub checkpoint_lsn: Lsn,
    pub n_log_flushes: u64,
    pub n_pending_log_flushes: u64,
    pub n_log_ios: u64,
}

struct LogState {
    file: Option<Arc<SmallFile>>,
    file_size: u64,
    buffer_size: usize,

    /// LSN of the first record byte the file holds.
    start_lsn: Lsn,
    /// Next LSN to assign.
    lsn: Lsn,
    /// Bytes `[buf_lsn, lsn)` not handed to the writer yet.
    buf: Vec<u8>,
    buf_lsn: Lsn,
    flushed_lsn: Lsn,
    checkpoint_lsn: Lsn,
    requested_lsn: Lsn,

    shutdown: bool,
    writer_running: bool,
    last_error: Option<SmallError>,
}

impl LogState {
    fn header(&self) -> LogHeader {
        LogHeader {
            start_lsn: self.start_lsn,
            checkpoint_lsn: self.checkpoint_lsn,
            flushed_lsn: self.flushed_lsn,
            current_lsn: self.flushed_lsn,
            file_size: self.file_size,
            ..LogHeader::new(self.file_size)
        }
    }

    fn capacity(&self) -> u64 {
        self.file_size.saturating_sub(LOG_HEADER_SIZE as u64)
    }

    /// Make room for `len` more bytes. When every byte of the file is
    /// covered by the checkpoint the file restarts at the current LSN
    /// and the new header is returned for the caller to persist,
    /// otherwise the append is refused.
    fn ensure_space(&mut self, len: usize) -> Result<Option<LogHeader>, SmallError> {
        if self.file.is_none() {
            return Ok(None);
        }
        if self.lsn - self.start_lsn + len as u64 <= self.capacity() {
            return Ok(None);
        }
        if self.checkpoint_lsn == self.lsn && self.buf.is_empty() && self.start_lsn < self.lsn {
            debug!("log file restarts at lsn {}", self.lsn);
            self.start_lsn = self.lsn;
            return Ok(Some(self.header()));
        }
        Err(SmallError::new(
            ErrorKind::NoSpace,
            &format!(
                "log file full: {} bytes used, {} requested, checkpoint at {}",
                self.lsn - self.start_lsn,
                len,
                self.checkpoint_lsn
            ),
        ))
    }

    fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.lsn += bytes.len() as u64;
    }
}

struct LogShared {
    state: Mutex<LogState>,
    /// Last header written to the file. Header I/O happens under this
    /// mutex only, never under `state`.
    header: Mutex<LogHeader>,
    /// Wakes the writer: flush requested, buffer full or shutdown.
    wake_writer: Condvar,
    /// Signaled by the writer after each flush.
    flushed: Condvar,
    n_log_flushes: AtomicU64,
    n_pending_log_flushes: AtomicU64,
    n_log_ios: AtomicU64,
}

/// The redo log: an in-memory buffer in front of `ib_logfile0`, drained
/// by a dedicated writer thread.
///
/// LSNs are byte offsets in the logical stream. Appends are serialized
/// by the log mutex.
pub struct LogManager {
    shared: Arc<LogShared>,
    writer: Mutex<Option<JoinHandle<()>>>,
    header_at_open: LogHeader,
}

/// An open streamed append. Holds the log mutex until closed.
pub struct LogWrite<'a> {
    state: MutexGuard<'a, LogState>,
    shared: &'a LogShared,
    start_lsn: Lsn,
    reserved: usize,
    written: usize,
}

impl<'a> LogWrite<'a> {
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    pub fn write_low(&mut self, bytes: &[u8]) -> SmallResult {
        if self.written + bytes.len() > self.reserved {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!(
                    "log write overflows its reservation: {} + {} > {}",
                    self.written,
                    bytes.len(),
                    self.reserved
                ),
            ));
        }
        self.state.append(bytes);
        self.written += bytes.len();
        Ok(())
    }

    /// Finish the append, returns the end LSN.
    pub fn close(self) -> Result<Lsn, SmallError> {
        if self.written != self.reserved {
            return Err(SmallError::new(
                ErrorKind::InvalidState,
                &format!(
                    "log write closed after {} of {} reserved bytes",
                    self.written, self.reserved
                ),
            ));
        }
        let end = self.state.lsn;
        if self.state.buf.len() >= self.state.buffer_size {
            self.shared.wake_writer.notify_one();
        }
        Ok(end)
    }
}

impl LogManager {
    /// Open the log file, writing a fresh header when the file is new.
    /// With the log disabled no file is touched and flushes complete
    /// immediately.
    pub fn open<P: AsRef<Path>>(path: P, config: &LogConfig) -> Result<Self, SmallError> {
        let mut header = LogHeader::new(config.file_size);
        let mut file = None;

        if config.enabled {
            let f = SmallFile::open(path.as_ref())?;
            if f.get_size()? < LOG_HEADER_SIZE as u64 {
                if let Err(e) = f
                    .write_at(0, &header.to_bytes())
                    .and_then(|_| f.sync())
                {
                    e.show_backtrace();
                    return Err(e);
                }
                info!("created log file {:?}", path.as_ref());
            } else {
                let mut buf = vec![0u8; LOG_HEADER_SIZE];
                f.read_at(0, &mut buf)?;
                header = LogHeader::from_bytes(&buf)?;
                header.file_size = config.file_size.max(header.file_size);
                info!(
                    "opened log file {:?}: checkpoint {}, flushed {}, current {}",
                    path.as_ref(),
                    header.checkpoint_lsn,
                    header.flushed_lsn,
                    header.current_lsn
                );
            }
            file = Some(Arc::new(f));
        }

        let state = LogState {
            file,
            file_size: header.file_size,
            buffer_size: config.buffer_size.max(1),
            start_lsn: header.start_lsn,
            lsn: header.current_lsn,
            buf: Vec::new(),
            buf_lsn: header.current_lsn,
            flushed_lsn: header.current_lsn,
            checkpoint_lsn: header.checkpoint_lsn,
            requested_lsn: header.current_lsn,
            shutdown: false,
            writer_running: false,
            last_error: None,
        };
        let has_file = state.file.is_some();

        let log = Self {
            shared: Arc::new(LogShared {
                state: Mutex::new(state),
                header: Mutex::new(header),
                wake_writer: Condvar::new(),
                flushed: Condvar::new(),
                n_log_flushes: AtomicU64::new(0),
                n_pending_log_flushes: AtomicU64::new(0),
                n_log_ios: AtomicU64::new(0),
            }),
            writer: Mutex::new(None),
            header_at_open: header,
        };
        if has_file {
            log.start_writer()?;
        }
        Ok(log)
    }

    fn start_writer(&self) -> SmallResult {
        let shared = self.shared.clone();
        shared.state.ml().writer_running = true;
        let handle = thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || writer_loop(shared))?;
        *self.writer.ml() = Some(handle);
        Ok(())
    }

    /// The header as it was found on disk at open time.
    pub fn header_at_open(&self) -> LogHeader {
        self.header_at_open
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.state.ml().file.is_some()
    }

    pub fn lsn(&self) -> Lsn {
        self.shared.state.ml().lsn
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.shared.state.ml().flushed_lsn
    }

    pub fn checkpoint_lsn(&self) -> Lsn {
        self.shared.state.ml().checkpoint_lsn
    }

    pub fn counters(&self) -> LogCounters {
        let st = self.shared.state.ml();
        LogCounters {
            lsn: st.lsn,
            flushed_lsn: st.flushed_lsn,
            checkpoint_lsn: st.checkpoint_lsn,
            n_log_flushes: self.shared.n_log_flushes.load(Ordering::SeqCst),
            n_pending_log_flushes: self.shared.n_pending_log_flushes.load(Ordering::SeqCst),
            n_log_ios: self.shared.n_log_ios.load(Ordering::SeqCst),
        }
    }

    /// Share of the file capacity in use since the file start.
    pub fn fill_ratio(&self) -> f64 {
        let st = self.shared.state.ml();
        let cap = st.capacity();
        if st.file.is_none() || cap == 0 {
            return 0.0;
        }
        (st.lsn - st.start_lsn) as f64 / cap as f64
    }

    /// Lock the log state with room for `len` more bytes. A file restart
    /// persists its header with the state unlocked, then checks again.
    fn lock_with_space(&self, len: usize) -> Result<MutexGuard<'_, LogState>, SmallError> {
        loop {
            let mut st = self.shared.state.ml();
            match st.ensure_space(len)? {
                None => return Ok(st),
                Some(header) => {
                    let file = st.file.clone();
                    drop(st);
                    persist_header(&self.shared, file.as_deref(), header)?;
                }
            }
        }
    }

    /// Append the bytes in one step. Returns the end LSN.
    pub fn reserve_and_write_fast(&self, bytes: &[u8]) -> Result<Lsn, SmallError> {
        let mut st = self.lock_with_space(bytes.len())?;
        st.append(bytes);
        let end = st.lsn;
        drop(st);
        self.shared.wake_writer.notify_one();
        Ok(end)
    }

    /// Reserve `len` bytes for a streamed append.
    pub fn reserve_and_open(&self, len: usize) -> Result<LogWrite<'_>, SmallError> {
        let st = self.lock_with_space(len)?;
        let start_lsn = st.lsn;
        Ok(LogWrite {
            state: st,
            shared: &self.shared,
            start_lsn,
            reserved: len,
            written: 0,
        })
    }

    /// Block until every byte below `min(lsn, current)` is on disk.
    pub fn flush_up_to(&self, lsn: Lsn) -> SmallResult {
        let mut st = self.shared.state.ml();
        let target = lsn.min(st.lsn);
        if st.file.is_none() {
            st.flushed_lsn = st.flushed_lsn.max(target);
            st.buf.clear();
            st.buf_lsn = st.lsn;
            return Ok(());
        }
        if st.flushed_lsn >= target {
            return Ok(());
        }
        st.requested_lsn = st.requested_lsn.max(target);
        st.last_error = None;
        self.shared.wake_writer.notify_one();

        while st.flushed_lsn < target {
            if let Some(e) = &st.last_error {
                return Err(e.clone());
            }
            if !st.writer_running {
                return Err(SmallError::new(
                    ErrorKind::InvalidState,
                    "log writer is not running",
                ));
            }
            st = self
                .shared
                .flushed
                .wait(st)
                .map_err(|_| SmallError::new(ErrorKind::Io, "log mutex poisoned"))?;
        }
        Ok(())
    }

    /// Persist `min(current, flushed)` as the checkpoint LSN.
    pub fn checkpoint(&self) -> Result<Lsn, SmallError> {
        self.checkpoint_up_to(Lsn::MAX)
    }

    /// Checkpoint no further than `limit`, the oldest change still only
    /// in the buffer pool. Once the checkpoint covers every appended
    /// byte the file restarts at the current LSN.
    pub fn checkpoint_up_to(&self, limit: Lsn) -> Result<Lsn, SmallError> {
        let mut st = self.shared.state.ml();
        let lsn = st.lsn.min(st.flushed_lsn).min(limit);
        if lsn > st.checkpoint_lsn {
            st.checkpoint_lsn = lsn;
        }
        if st.checkpoint_lsn == st.lsn && st.buf.is_empty() && st.start_lsn < st.lsn {
            st.start_lsn = st.lsn;
        }
        let checkpoint = st.checkpoint_lsn;
        let header = st.header();
        let file = st.file.clone();
        drop(st);
        persist_header(&self.shared, file.as_deref(), header)?;
        debug!("checkpoint at lsn {}", checkpoint);
        Ok(checkpoint)
    }

    /// Read the persisted record bytes `[from, to)`.
    pub fn read_range(&self, from: Lsn, to: Lsn) -> Result<Vec<u8>, SmallError> {
        let st = self.shared.state.ml();
        let file = match &st.file {
            Some(f) => f.clone(),
            None => return Ok(Vec::new()),
        };
        if from < st.start_lsn || to < from {
            return Err(SmallError::new(
                ErrorKind::CorruptLog,
                &format!(
                    "range [{}, {}) outside the log file starting at {}",
                    from, to, st.start_lsn
                ),
            ));
        }
        let offset = st.header().offset_of(from);
        drop(st);
        let mut buf = vec![0u8; (to - from) as usize];
        let n = file.read_at(offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Flush everything, stop the writer and leave the file without a
    /// new checkpoint.
    pub fn close(&self) -> SmallResult {
        let lsn = self.lsn();
        let flushed = self.flush_up_to(lsn);
        self.stop_writer();
        let (header, file) = {
            let st = self.shared.state.ml();
            (st.header(), st.file.clone())
        };
        persist_header(&self.shared, file.as_deref(), header)?;
        flushed
    }

    /// Flush, checkpoint and close.
    pub fn shutdown(&self) -> SmallResult {
        let lsn = self.lsn();
        self.flush_up_to(lsn)?;
        self.checkpoint()?;
        self.stop_writer();
        info!("log shut down at lsn {}", lsn);
        Ok(())
    }

    fn stop_writer(&self) {
        {
            let mut st = self.shared.state.ml();
            st.shutdown = true;
        }
        self.shared.wake_writer.notify_all();
        if let Some(handle) = self.writer.ml().take() {
            if handle.join().is_err() {
                error!("log writer panicked");
            }
        }
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.stop_writer();
    }
}

impl FlushObserver for LogManager {
    fn before_page_write(&self, page_id: PageID, newest_lsn: Lsn) -> SmallResult {
        if newest_lsn > self.flushed_lsn() {
            debug!("flushing log to {} before writing {:?}", newest_lsn, page_id);
        }
        self.flush_up_to(newest_lsn)
    }
}

/// Write `header` merged with the last one written, then sync.
fn persist_header(shared: &LogShared, file: Option<&SmallFile>, header: LogHeader) -> SmallResult {
    let file = match file {
        Some(f) => f,
        None => return Ok(()),
    };
    let mut last = shared.header.ml();
    let merged = last.merged(&header);
    file.write_at(0, &merged.to_bytes())?;
    file.sync()?;
    *last = merged;
    Ok(())
}

fn writer_loop(shared: Arc<LogShared>) {
    let mut st = shared.state.ml();
    loop {
        while !st.shutdown && st.requested_lsn <= st.flushed_lsn && st.buf.len() < st.buffer_size {
            st = match shared.wake_writer.wait(st) {
                Ok(g) => g,
                Err(_) => return,
            };
        }
        if st.buf.is_empty() {
            if st.shutdown {
                break;
            }
            // nothing buffered but a flush was asked for: it is covered
            st.flushed_lsn = st.flushed_lsn.max(st.requested_lsn.min(st.lsn));
            shared.flushed.notify_all();
            continue;
        }

        let data = mem::take(&mut st.buf);
        let from = st.buf_lsn;
        st.buf_lsn = st.lsn;
        let offset = st.header().offset_of(from);
        let file = st.file.clone();
        shared.n_pending_log_flushes.fetch_add(1, Ordering::SeqCst);
        drop(st);

        let result = match &file {
            Some(f) => f.write_at(offset, &data).and_then(|_| f.sync()),
            None => Ok(()),
        };
        shared.n_log_ios.fetch_add(1, Ordering::SeqCst);

        // the header must cover `end` before waiters see it flushed
        let end = from + data.len() as u64;
        let result = result.and_then(|_| {
            let header = {
                let st = shared.state.ml();
                LogHeader {
                    flushed_lsn: st.flushed_lsn.max(end),
                    current_lsn: st.flushed_lsn.max(end),
                    ..st.header()
                }
            };
            persist_header(&shared, file.as_deref(), header)
        });

        st = shared.state.ml();
        shared.n_pending_log_flushes.fetch_sub(1, Ordering::SeqCst);
        match result {
            Ok(()) => {
                st.flushed_lsn = st.flushed_lsn.max(end);
                shared.n_log_flushes.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                error!("log write at lsn {} failed: {}", from, e);
                // keep the bytes so the next flush retries them
                let mut rest = data;
                rest.extend_from_slice(&st.buf);
                st.buf = rest;
                st.buf_lsn = from;
                st.requested_lsn = st.flushed_lsn;
                st.last_error = Some(e);
            }
        }
        shared.flushed.notify_all();
    }
    st.writer_running = false;
    shared.flushed.notify_all();
}
