//! File-backed measurement storage.
//!
//! The writer task exclusively owns the active file; the repository only
//! reads. Both sides speak the same one-record-per-line format, defined in
//! [`models`].

mod models;
mod repository;
mod writer;

pub use models::{ParseRecordError, PingRecord, LOSS_LATENCY, TIMESTAMP_FORMAT};
pub use repository::LogRepository;
pub use writer::{LogWriter, WriterHandle, ACTIVE_FILE_NAME};

use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log writer is not running")]
    WriterClosed,
}
