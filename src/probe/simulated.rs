//! Simulated reachability probe for demo and test runs.
//!
//! Replaces network I/O with randomized sleeps. The designated cloud address
//! gets a heavily biased loss rate and a wider latency bucket; every other
//! address answers almost always, quickly.

use std::time::Duration;

use super::Prober;

/// Loss percentage for the designated cloud address.
const CLOUD_LOSS_PERCENT: u64 = 40;

/// Loss percentage for every other address.
const DEFAULT_LOSS_PERCENT: u64 = 1;

/// Prober that fakes reachability with randomized delays.
#[derive(Debug, Clone)]
pub struct SimulatedProber {
    cloud_address: String,
}

impl SimulatedProber {
    pub fn new(cloud_address: &str) -> Self {
        Self {
            cloud_address: cloud_address.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Prober for SimulatedProber {
    async fn probe(&self, ip: &str, timeout: Duration) -> bool {
        let (loss_percent, latency) = if ip == self.cloud_address {
            (
                CLOUD_LOSS_PERCENT,
                Duration::from_millis(30 + rand::random::<u64>() % 270),
            )
        } else {
            (
                DEFAULT_LOSS_PERCENT,
                Duration::from_millis(1 + rand::random::<u64>() % 29),
            )
        };

        if rand::random::<u64>() % 100 < loss_percent {
            // A lost probe blocks for the full timeout, like the real thing.
            tokio::time::sleep(timeout).await;
            false
        } else {
            tokio::time::sleep(latency.min(timeout)).await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUNDS: usize = 300;

    #[test]
    fn test_cloud_address_loses_roughly_forty_percent() {
        let prober = SimulatedProber::new("8.8.8.8");
        let lost = tokio_test::block_on(async {
            let mut lost = 0;
            for _ in 0..ROUNDS {
                if !prober.probe("8.8.8.8", Duration::from_millis(1)).await {
                    lost += 1;
                }
            }
            lost
        });

        // Binomial(300, 0.4): anything outside these bounds is astronomically
        // unlikely and indicates the bias is wrong.
        assert!((60..=180).contains(&lost), "lost {} of {}", lost, ROUNDS);
    }

    #[test]
    fn test_other_addresses_rarely_lose() {
        let prober = SimulatedProber::new("8.8.8.8");
        let lost = tokio_test::block_on(async {
            let mut lost = 0;
            for _ in 0..ROUNDS {
                if !prober.probe("192.168.1.1", Duration::from_millis(1)).await {
                    lost += 1;
                }
            }
            lost
        });

        assert!(lost <= 15, "lost {} of {}", lost, ROUNDS);
    }

    #[test]
    fn test_latency_never_exceeds_timeout() {
        let prober = SimulatedProber::new("8.8.8.8");
        tokio_test::block_on(async {
            let start = std::time::Instant::now();
            prober.probe("10.0.0.1", Duration::from_millis(5)).await;
            // Generous margin for scheduler jitter.
            assert!(start.elapsed() < Duration::from_millis(500));
        });
    }
}
