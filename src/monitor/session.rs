//! The per-address probe loop.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tokio::time::{Duration, MissedTickBehavior};

use crate::probe::{Prober, PROBE_TIMEOUT};
use crate::store::{PingRecord, WriterHandle, LOSS_LATENCY};

/// Time between iteration starts.
const PROBE_CADENCE: Duration = Duration::from_secs(1);

/// Run the probe loop for a single address until a stop is signalled.
///
/// Stop is cooperative: it is observed at iteration boundaries, so an
/// in-flight probe always completes and its record is still submitted.
/// The permit ties the session to the orchestrator's concurrency bound for
/// its whole running lifetime.
pub(super) async fn run_session_loop(
    ip: String,
    prober: Arc<dyn Prober>,
    writer: WriterHandle,
    mut stop_rx: broadcast::Receiver<()>,
    _permit: OwnedSemaphorePermit,
) {
    tracing::info!("Session started for {}", ip);

    let mut interval = tokio::time::interval(PROBE_CADENCE);
    // A slow probe lowers the effective frequency; missed ticks are not
    // replayed as catch-up bursts.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let started = Instant::now();
                let reachable = prober.probe(&ip, PROBE_TIMEOUT).await;
                // An unanswered probe is data, not an error: it becomes a
                // loss record and the loop keeps monitoring.
                let latency = if reachable {
                    started.elapsed().as_millis() as i64
                } else {
                    LOSS_LATENCY
                };
                writer.submit(PingRecord::now(&ip, latency));
            }
        }
    }

    tracing::info!("Session stopped for {}", ip);
}
