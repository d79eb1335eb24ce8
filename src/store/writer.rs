//! Asynchronous log writer with row-count-based file rotation.
//!
//! Single-writer pattern: one consumer task owns the active file handle and
//! processes commands from a bounded MPSC channel. All mutation of the log,
//! including the synchronous save path and truncation, goes through it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::models::PingRecord;
use super::StoreError;

/// Canonical name of the active log file inside the log directory.
pub const ACTIVE_FILE_NAME: &str = "ping.log";

/// Timestamp format embedded in rotated file names.
const ROTATION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Commands processed by the writer's consumer task.
#[derive(Debug)]
enum Command {
    /// Fire-and-forget append from a ping session.
    Append(PingRecord),
    /// Synchronous append, acknowledged once the record is on disk.
    Save(PingRecord, oneshot::Sender<Result<(), StoreError>>),
    /// Truncate the active file; rotated files are untouched.
    Clear(oneshot::Sender<Result<(), StoreError>>),
    /// Graceful shutdown.
    Shutdown,
}

/// Cloneable handle for submitting records to a running [`LogWriter`].
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl WriterHandle {
    /// Enqueue a record without blocking the calling session.
    ///
    /// A full queue drops the record and bumps the drop counter: keeping the
    /// probe cadence intact matters more than never losing a measurement.
    pub fn submit(&self, record: PingRecord) {
        match self.tx.try_send(Command::Append(record)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "Write queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Write queue closed, dropping record");
            }
        }
    }

    /// Append a record and wait until it has been flushed to disk.
    pub async fn save(&self, record: PingRecord) -> Result<(), StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Save(record, ack_tx))
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        ack_rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Truncate the active log file to empty.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Clear(ack_tx))
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        ack_rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Signal the consumer to finish its current item and exit.
    ///
    /// Safe to call even if the writer was never started or already stopped.
    pub async fn stop(&self) {
        if self.tx.send(Command::Shutdown).await.is_err() {
            tracing::warn!("Writer already stopped");
        }
    }

    /// Number of records dropped due to back-pressure so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Append-only log writer that rotates the active file once it reaches a
/// configured row count.
pub struct LogWriter {
    dir: PathBuf,
    active_path: PathBuf,
    file: BufWriter<File>,
    rows: usize,
    max_rows: usize,
    rotation_counter: u64,
    rx: mpsc::Receiver<Command>,
    handle: WriterHandle,
}

impl LogWriter {
    /// Open the active log file, creating the log directory as needed.
    ///
    /// Existing rows are counted once here; afterwards the count is tracked
    /// incrementally. An open failure is fatal: without an active file no
    /// persistence is possible at all.
    pub fn open(dir: &Path, max_rows: usize, queue_capacity: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let active_path = dir.join(ACTIVE_FILE_NAME);
        let rows = count_rows(&active_path)?;
        let file = open_active(&active_path)?;

        let (tx, rx) = mpsc::channel(queue_capacity);
        let handle = WriterHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        tracing::info!(path = %active_path.display(), rows, "Log writer opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            active_path,
            file,
            rows,
            max_rows,
            rotation_counter: 1,
            rx,
            handle,
        })
    }

    /// Handle for submitting records; clone freely across sessions.
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Spawn the single consumer task.
    ///
    /// Consumes the writer, so it can only ever be started once.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!("Log writer started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Append(record) => {
                    // A transient I/O failure must not kill the consumer;
                    // the next record gets another try.
                    if let Err(e) = self.persist(&record) {
                        tracing::error!(error = %e, "Failed to persist record");
                    }
                }
                Command::Save(record, ack) => {
                    let _ = ack.send(self.persist(&record));
                }
                Command::Clear(ack) => {
                    let _ = ack.send(self.truncate());
                }
                Command::Shutdown => break,
            }
        }

        if let Err(e) = self.file.flush() {
            tracing::error!(error = %e, "Final flush failed");
        }
        tracing::info!("Log writer stopped");
    }

    /// Append one record, rotating first if the active file is full.
    ///
    /// Each record is flushed before the next command is dequeued.
    fn persist(&mut self, record: &PingRecord) -> Result<(), StoreError> {
        if self.rows >= self.max_rows {
            if let Err(e) = self.rotate() {
                // Keep appending to whatever handle remains valid.
                tracing::error!(error = %e, "Rotation failed, continuing on current file");
            }
        }

        writeln!(self.file, "{}", record.to_line())?;
        self.file.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Close the full active file under a rotated name and start a fresh one.
    ///
    /// The rename is atomic, so a concurrent reader observes either the pre-
    /// or post-rotation state, never a truncated file.
    fn rotate(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;

        let timestamp = Local::now().format(ROTATION_TIMESTAMP_FORMAT);
        let mut rotated = self
            .dir
            .join(format!("ping_{}_{}.log", timestamp, self.rotation_counter));
        while rotated.exists() {
            self.rotation_counter += 1;
            rotated = self
                .dir
                .join(format!("ping_{}_{}.log", timestamp, self.rotation_counter));
        }

        std::fs::rename(&self.active_path, &rotated)?;
        self.rotation_counter += 1;

        tracing::info!(rotated = %rotated.display(), rows = self.rows, "Rotated log file");

        self.file = open_active(&self.active_path)?;
        self.rows = 0;
        Ok(())
    }

    fn truncate(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        let file = self.file.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.rows = 0;
        tracing::info!("Active log file cleared");
        Ok(())
    }
}

fn open_active(path: &Path) -> Result<BufWriter<File>, StoreError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

fn count_rows(path: &Path) -> Result<usize, StoreError> {
    match File::open(path) {
        Ok(file) => Ok(BufReader::new(file).lines().count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
