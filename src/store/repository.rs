//! Read path over the persisted log files.
//!
//! Every query re-scans the rotated and active files, so results always
//! reflect on-disk truth at the cost of an O(n) pass. Writes (the synchronous
//! save path and truncation) are delegated to the writer task, which is the
//! only actor allowed to touch the files for mutation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use super::models::PingRecord;
use super::writer::{WriterHandle, ACTIVE_FILE_NAME};
use super::StoreError;

/// Query engine over a log directory.
#[derive(Clone)]
pub struct LogRepository {
    dir: PathBuf,
    writer: WriterHandle,
}

impl LogRepository {
    pub fn new(dir: &Path, writer: WriterHandle) -> Self {
        Self {
            dir: dir.to_path_buf(),
            writer,
        }
    }

    /// All records, rotated files first, then the active file.
    pub fn find_all(&self) -> Vec<PingRecord> {
        self.scan(|_| true)
    }

    /// Records whose address matches `ip` exactly.
    pub fn find_by_ip(&self, ip: &str) -> Vec<PingRecord> {
        self.scan(|r| r.ip_address == ip)
    }

    /// Records with `start <= timestamp <= end`, inclusive on both bounds.
    pub fn find_by_time_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<PingRecord> {
        self.scan(|r| start <= r.timestamp && r.timestamp <= end)
    }

    /// Conjunction of the time-range and exact-IP filters.
    pub fn find_by_time_range_and_ip(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        ip: &str,
    ) -> Vec<PingRecord> {
        self.scan(|r| r.ip_address == ip && start <= r.timestamp && r.timestamp <= end)
    }

    /// Fraction of records for `ip` that are loss markers, rounded half-up
    /// to two decimal places. `0.0` when no records match.
    pub fn lost_ratio_by_ip(&self, ip: &str) -> f64 {
        lost_ratio(&self.find_by_ip(ip))
    }

    /// Same ratio restricted to the inclusive time range.
    pub fn lost_ratio_by_time_range_and_ip(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        ip: &str,
    ) -> f64 {
        lost_ratio(&self.find_by_time_range_and_ip(start, end, ip))
    }

    /// Append a single record synchronously via the writer task.
    pub async fn save(&self, record: PingRecord) -> Result<(), StoreError> {
        self.writer.save(record).await
    }

    /// Truncate the active log; rotated files are left untouched.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.writer.clear().await
    }

    fn scan<F>(&self, predicate: F) -> Vec<PingRecord>
    where
        F: Fn(&PingRecord) -> bool,
    {
        let mut records = Vec::new();
        for path in self.log_files() {
            scan_file(&path, &predicate, &mut records);
        }
        records
    }

    /// Rotated files in name order (chronological), then the active file.
    fn log_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Log directory unreadable");
                return Vec::new();
            }
        };

        let mut rotated: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("ping_") && n.ends_with(".log"))
            })
            .collect();
        rotated.sort();
        rotated.push(self.dir.join(ACTIVE_FILE_NAME));
        rotated
    }
}

fn scan_file<F>(path: &Path, predicate: &F, out: &mut Vec<PingRecord>)
where
    F: Fn(&PingRecord) -> bool,
{
    let file = match File::open(path) {
        Ok(file) => file,
        // Queries against a missing log return empty rather than failing.
        Err(_) => return,
    };

    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Stopping scan of unreadable file");
                return;
            }
        };
        if line.is_empty() {
            continue;
        }
        match PingRecord::parse_line(&line) {
            Ok(record) => {
                if predicate(&record) {
                    out.push(record);
                }
            }
            // One corrupt line must not make the rest unreadable.
            Err(e) => {
                tracing::warn!(path = %path.display(), line = number + 1, error = %e, "Skipping malformed record");
            }
        }
    }
}

/// Loss ratio rounded half-up to two decimal places.
///
/// Computed in integer hundredths so the result is exact, instead of
/// accumulating float-division error.
fn lost_ratio(records: &[PingRecord]) -> f64 {
    let total = records.len() as u64;
    if total == 0 {
        return 0.0;
    }
    let lost = records.iter().filter(|r| r.is_loss()).count() as u64;
    let hundredths = (lost * 200 + total) / (total * 2);
    hundredths as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{TIMESTAMP_FORMAT, LOSS_LATENCY};
    use crate::store::writer::LogWriter;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn record(time: &str, ip: &str, latency: i64) -> PingRecord {
        PingRecord {
            timestamp: ts(time),
            ip_address: ip.to_string(),
            latency_millis: latency,
        }
    }

    async fn repo_with(
        max_rows: usize,
        records: &[PingRecord],
    ) -> (TempDir, LogRepository, tokio::task::JoinHandle<()>) {
        let dir = tempdir().unwrap();
        let writer = LogWriter::open(dir.path(), max_rows, 64).unwrap();
        let handle = writer.handle();
        let join = writer.start();
        let repo = LogRepository::new(dir.path(), handle);
        for r in records {
            repo.save(r.clone()).await.unwrap();
        }
        (dir, repo, join)
    }

    #[tokio::test]
    async fn test_save_find_all_round_trip() {
        let saved = record("2024-05-01 10:00:00", "192.168.1.1", 17);
        let (_dir, repo, _join) = repo_with(100, std::slice::from_ref(&saved)).await;

        assert_eq!(repo.find_all(), vec![saved]);
    }

    #[tokio::test]
    async fn test_find_all_spans_rotated_files() {
        let records: Vec<PingRecord> = (0..5)
            .map(|i| record("2024-05-01 10:00:00", "10.0.0.1", i))
            .collect();
        let (_dir, repo, _join) = repo_with(2, &records).await;

        assert_eq!(repo.find_all().len(), 5);
    }

    #[tokio::test]
    async fn test_find_by_ip_is_exact_match() {
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "8.8.8.8", 20),
                record("2024-05-01 10:00:01", "192.168.1.1", 2),
                record("2024-05-01 10:00:02", "8.8.8.8", LOSS_LATENCY),
            ],
        )
        .await;

        let found = repo.find_by_ip("8.8.8.8");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.ip_address == "8.8.8.8"));
        assert!(repo.find_by_ip("1.1.1.1").is_empty());
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive_on_both_bounds() {
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 09:59:59", "10.0.0.1", 1),
                record("2024-05-01 10:00:00", "10.0.0.1", 2),
                record("2024-05-01 10:30:00", "10.0.0.1", 3),
                record("2024-05-01 11:00:00", "10.0.0.1", 4),
                record("2024-05-01 11:00:01", "10.0.0.1", 5),
            ],
        )
        .await;

        let found =
            repo.find_by_time_range(ts("2024-05-01 10:00:00"), ts("2024-05-01 11:00:00"));
        let latencies: Vec<i64> = found.iter().map(|r| r.latency_millis).collect();
        assert_eq!(latencies, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_time_range_and_ip_conjunction() {
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "8.8.8.8", 20),
                record("2024-05-01 10:00:00", "192.168.1.1", 1),
                record("2024-05-01 12:00:00", "8.8.8.8", 25),
            ],
        )
        .await;

        let found = repo.find_by_time_range_and_ip(
            ts("2024-05-01 09:00:00"),
            ts("2024-05-01 11:00:00"),
            "8.8.8.8",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].latency_millis, 20);
    }

    #[tokio::test]
    async fn test_lost_ratio_half_success() {
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "8.8.8.8", 20),
                record("2024-05-01 10:00:01", "8.8.8.8", LOSS_LATENCY),
            ],
        )
        .await;

        assert_eq!(repo.lost_ratio_by_ip("8.8.8.8"), 0.50);
    }

    #[tokio::test]
    async fn test_lost_ratio_no_records_is_zero() {
        let (_dir, repo, _join) = repo_with(100, &[]).await;
        assert_eq!(repo.lost_ratio_by_ip("8.8.8.8"), 0.0);
    }

    #[tokio::test]
    async fn test_lost_ratio_only_counts_loss_markers() {
        // Latency 0 is a valid (fast) measurement, not a loss.
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "8.8.8.8", 0),
                record("2024-05-01 10:00:01", "8.8.8.8", LOSS_LATENCY),
                record("2024-05-01 10:00:02", "8.8.8.8", 300),
            ],
        )
        .await;

        assert_eq!(repo.lost_ratio_by_ip("8.8.8.8"), 0.33);
    }

    #[tokio::test]
    async fn test_lost_ratio_by_time_range_and_ip() {
        let (_dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "8.8.8.8", LOSS_LATENCY),
                record("2024-05-01 10:00:01", "8.8.8.8", 20),
                record("2024-05-01 12:00:00", "8.8.8.8", LOSS_LATENCY),
            ],
        )
        .await;

        let ratio = repo.lost_ratio_by_time_range_and_ip(
            ts("2024-05-01 10:00:00"),
            ts("2024-05-01 11:00:00"),
            "8.8.8.8",
        );
        assert_eq!(ratio, 0.50);
    }

    #[test]
    fn test_lost_ratio_rounds_half_up() {
        let mut records = vec![record("2024-05-01 10:00:00", "a", LOSS_LATENCY)];
        records.extend((0..7).map(|i| record("2024-05-01 10:00:01", "a", i)));
        // 1/8 = 0.125 rounds up to 0.13, not down to 0.12.
        assert_eq!(lost_ratio(&records), 0.13);

        let records = vec![
            record("2024-05-01 10:00:00", "a", LOSS_LATENCY),
            record("2024-05-01 10:00:01", "a", 1),
            record("2024-05-01 10:00:02", "a", 2),
        ];
        // 1/3 = 0.333... stays at 0.33.
        assert_eq!(lost_ratio(&records), 0.33);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() {
        let (dir, repo, _join) = repo_with(
            100,
            &[
                record("2024-05-01 10:00:00", "10.0.0.1", 5),
                record("2024-05-01 10:00:01", "10.0.0.1", 6),
            ],
        )
        .await;

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(ACTIVE_FILE_NAME))
            .unwrap();
        writeln!(file, "garbage that is not a record").unwrap();
        writeln!(file, "2024-05-01 10:00:02,10.0.0.1,7").unwrap();

        let latencies: Vec<i64> = repo.find_all().iter().map(|r| r.latency_millis).collect();
        assert_eq!(latencies, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_missing_log_dir_returns_empty() {
        let dir = tempdir().unwrap();
        let writer = LogWriter::open(dir.path(), 100, 16).unwrap();
        let repo = LogRepository::new(&dir.path().join("nowhere"), writer.handle());

        assert!(repo.find_all().is_empty());
        assert_eq!(repo.lost_ratio_by_ip("8.8.8.8"), 0.0);
    }
}
