use std::{error::Error, fmt};

use backtrace::Backtrace;
use log::error;

/// The failure classes surfaced by the engine.
///
/// Lock waits, timeouts and deadlocks are returned to the transaction
/// layer, which decides whether to retry or roll back. Structural
/// failures (`Corrupt*`, `ShortBuffer`) come from parsing persisted
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    NoSpace,
    NoFreeFrame,
    LockWait,
    LockWaitTimeout,
    Deadlock,
    CorruptLog,
    CorruptPage,
    ShortBuffer,
    InvalidInput,
    InvalidState,
    Io,
}

#[derive(Debug, Clone)]
pub struct SmallError {
    kind: ErrorKind,
    details: String,
}

impl SmallError {
    pub fn new(kind: ErrorKind, msg: &str) -> SmallError {
        SmallError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn not_found(msg: &str) -> SmallError {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn invalid(msg: &str) -> SmallError {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub fn short_buffer(need: usize, have: usize) -> SmallError {
        Self::new(
            ErrorKind::ShortBuffer,
            &format!("short buffer: need {} bytes, have {}", need, have),
        )
    }

    /// Log the error together with the current call stack.
    pub fn show_backtrace(&self) {
        let bt = Backtrace::new();
        error!("{}\nbacktrace:\n{:?}", self, bt);
    }
}

impl fmt::Display for SmallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.details)
    }
}

impl Error for SmallError {}

impl From<std::io::Error> for SmallError {
    fn from(e: std::io::Error) -> Self {
        SmallError::new(ErrorKind::Io, &e.to_string())
    }
}
