//! Session orchestrator.
//!
//! Owns the set of active ping sessions for one monitoring run and exposes
//! the query pass-through consumed by the presentation layer.

mod session;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock, Semaphore};

use crate::probe::Prober;
use crate::store::{LogRepository, PingRecord, WriterHandle};

/// Orchestrator error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("too many targets: {requested} requested, maximum is {max}")]
    TooManyTargets { requested: usize, max: usize },
}

/// Owner of the concurrent ping sessions.
///
/// Each running session holds one semaphore permit, so the number of
/// concurrently monitored addresses can never exceed `max_sessions` even
/// across racing `start_all` calls. The log writer runs on its own task and
/// does not compete for permits.
pub struct Monitor {
    prober: Arc<dyn Prober>,
    writer: WriterHandle,
    repository: LogRepository,
    sessions: Arc<RwLock<HashMap<String, broadcast::Sender<()>>>>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl Monitor {
    pub fn new(
        prober: Arc<dyn Prober>,
        writer: WriterHandle,
        repository: LogRepository,
        max_sessions: usize,
    ) -> Self {
        Self {
            prober,
            writer,
            repository,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    /// Start one session per address.
    ///
    /// Duplicate addresses are collapsed, already-running ones are skipped.
    /// Fails without starting anything if the resulting set would exceed the
    /// session cap.
    pub async fn start_all(&self, ips: Vec<String>) -> Result<(), MonitorError> {
        let mut sessions = self.sessions.write().await;

        let mut fresh: Vec<String> = Vec::new();
        for ip in ips {
            if sessions.contains_key(&ip) {
                tracing::info!("Monitor: {} already active, skipping", ip);
            } else if !fresh.contains(&ip) {
                fresh.push(ip);
            }
        }

        let requested = sessions.len() + fresh.len();
        if requested > self.max_sessions {
            return Err(MonitorError::TooManyTargets {
                requested,
                max: self.max_sessions,
            });
        }

        for ip in fresh {
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    return Err(MonitorError::TooManyTargets {
                        requested,
                        max: self.max_sessions,
                    })
                }
            };

            tracing::info!("Monitor: starting session for {}", ip);
            let (stop_tx, stop_rx) = broadcast::channel(1);
            sessions.insert(ip.clone(), stop_tx);

            tokio::spawn(session::run_session_loop(
                ip,
                self.prober.clone(),
                self.writer.clone(),
                stop_rx,
                permit,
            ));
        }

        Ok(())
    }

    /// Request stop on every active session and clear the active set.
    ///
    /// With nothing active this is a reported no-op, not an error.
    pub async fn stop_all(&self) {
        let mut sessions = self.sessions.write().await;
        if sessions.is_empty() {
            tracing::warn!("Monitor: stop requested with no active sessions");
            return;
        }

        for (ip, stop_tx) in sessions.drain() {
            let _ = stop_tx.send(());
            tracing::info!("Monitor: stop requested for {}", ip);
        }
    }

    /// Records dropped by the write queue under back-pressure so far.
    pub fn dropped_records(&self) -> u64 {
        self.writer.dropped_count()
    }

    /// Currently monitored addresses, sorted for stable output.
    pub async fn active_ip_addresses(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ips.sort();
        ips
    }

    // --- Query pass-through ---

    pub fn find_all(&self) -> Vec<PingRecord> {
        self.repository.find_all()
    }

    pub fn find_by_ip(&self, ip: &str) -> Vec<PingRecord> {
        self.repository.find_by_ip(ip)
    }

    pub fn find_by_time_range(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<PingRecord> {
        self.repository.find_by_time_range(start, end)
    }

    pub fn find_by_time_range_and_ip(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        ip: &str,
    ) -> Vec<PingRecord> {
        self.repository.find_by_time_range_and_ip(start, end, ip)
    }

    pub fn lost_ratio_by_ip(&self, ip: &str) -> f64 {
        self.repository.lost_ratio_by_ip(ip)
    }

    pub fn lost_ratio_by_time_range_and_ip(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        ip: &str,
    ) -> f64 {
        self.repository
            .lost_ratio_by_time_range_and_ip(start, end, ip)
    }
}
