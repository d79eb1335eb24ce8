//! Best-effort discovery of default monitoring targets.
//!
//! Runs the system `traceroute` toward the well-known cloud address and
//! collects the first hop addresses (local gateway, ISP). Any failure —
//! missing binary, non-zero exit, unparsable output — degrades to an empty
//! list; startup never depends on this succeeding.

use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

/// Well-known always-on cloud address, also the traceroute destination.
pub const CLOUD_ADDRESS: &str = "8.8.8.8";

/// Discover up to `max_hops` intermediate hop addresses toward the cloud.
pub async fn discover_route(max_hops: usize) -> Vec<String> {
    let output = Command::new("traceroute")
        .args([
            "-n",
            "-m",
            &max_hops.to_string(),
            "-w",
            "1",
            "-q",
            "1",
            CLOUD_ADDRESS,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            let hops = parse_hops(&String::from_utf8_lossy(&output.stdout), max_hops);
            if hops.is_empty() {
                tracing::warn!("Route discovery produced no hops");
            } else {
                tracing::info!("Route discovery found hops: {:?}", hops);
            }
            hops
        }
        Err(e) => {
            tracing::warn!("Route discovery unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Extract hop addresses from numeric traceroute output.
///
/// Lines look like `  1  192.168.1.1  0.353 ms`; unanswered hops print `*`
/// and are skipped.
fn parse_hops(output: &str, max_hops: usize) -> Vec<String> {
    static HOP_LINE: OnceLock<Regex> = OnceLock::new();
    let re = HOP_LINE
        .get_or_init(|| Regex::new(r"^\s*\d+\s+(\d{1,3}(?:\.\d{1,3}){3})\b").unwrap());

    let mut hops = Vec::new();
    for line in output.lines() {
        if let Some(caps) = re.captures(line) {
            let hop = caps[1].to_string();
            if !hops.contains(&hop) {
                hops.push(hop);
            }
        }
        if hops.len() >= max_hops {
            break;
        }
    }
    hops
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
traceroute to 8.8.8.8 (8.8.8.8), 5 hops max, 60 byte packets
 1  192.168.1.1  0.353 ms
 2  10.11.0.1  8.915 ms
 3  *
 4  72.14.204.68  12.061 ms
 5  8.8.8.8  11.433 ms
";

    #[test]
    fn test_parse_hops_skips_unanswered() {
        let hops = parse_hops(SAMPLE, 5);
        assert_eq!(hops, vec!["192.168.1.1", "10.11.0.1", "72.14.204.68", "8.8.8.8"]);
    }

    #[test]
    fn test_parse_hops_respects_limit() {
        let hops = parse_hops(SAMPLE, 2);
        assert_eq!(hops, vec!["192.168.1.1", "10.11.0.1"]);
    }

    #[test]
    fn test_parse_hops_ignores_header_and_garbage() {
        assert!(parse_hops("no route to host\n", 3).is_empty());
        assert!(parse_hops("", 3).is_empty());
    }

    #[tokio::test]
    async fn test_discover_route_never_fails() {
        // Whatever the host environment looks like, discovery must degrade
        // to a (possibly empty) list instead of erroring.
        let hops = discover_route(2).await;
        assert!(hops.len() <= 2);
    }
}
