//! Reachability probe capability.
//!
//! Two variants behind one trait: the real ICMP prober and a simulated one
//! for demo/test runs. The variant is chosen once at construction time from
//! configuration.

mod icmp;
mod simulated;

pub use icmp::IcmpProber;
pub use simulated::SimulatedProber;

use std::time::Duration;

/// Fixed per-probe timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Blocking reachability check against a single address.
///
/// Implementations block for at most `timeout` and never propagate transport
/// errors: anything that prevents a reply in time is simply "not reachable".
/// Latency is measured by the caller around this call.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, ip: &str, timeout: Duration) -> bool;
}
