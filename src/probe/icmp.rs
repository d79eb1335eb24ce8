//! ICMP reachability probe with native sockets and a command fallback.
//!
//! Native echo uses blocking sockets in spawn_blocking; when raw/dgram ICMP
//! sockets are unavailable (or permission-denied at send time) the probe
//! falls back to the system `ping` binary.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::process::Command;

use super::Prober;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Echo sequence counter so concurrent probes to the same host can be told apart.
static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

#[derive(Error, Debug)]
enum EchoError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Reachability probe backed by ICMP echo.
#[derive(Debug, Default)]
pub struct IcmpProber;

impl IcmpProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, ip: &str, timeout: Duration) -> bool {
        match echo(ip, timeout).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(ip, error = %e, "Probe unanswered");
                false
            }
        }
    }
}

fn detect_icmp_capability() -> IcmpCapability {
    // RAW requires CAP_NET_RAW or root; DGRAM works unprivileged on Linux
    // with ping_group_range set, and on macOS.
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: using native sockets (RAW, privileged)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: using native sockets (DGRAM, unprivileged)");
        return IcmpCapability::Native;
    }
    tracing::info!("ICMP probe: native sockets unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

async fn echo(address: &str, timeout: Duration) -> Result<(), EchoError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_address(address).await?;

        let result = tokio::task::spawn_blocking(move || blocking_echo(ip, timeout))
            .await
            .map_err(|e| EchoError::Network(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                let text = format!("{:?}", e);
                if !(text.contains("Permission")
                    || text.contains("Operation not permitted")
                    || text.contains("denied"))
                {
                    return Err(e);
                }
                tracing::warn!(
                    address,
                    error = %e,
                    "Native echo hit a permission error, falling back to command"
                );
            }
        }
    }

    ping_command(address, timeout).await
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, EchoError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| EchoError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| EchoError::Network(format!("no addresses found for {}", address)))
}

/// One blocking echo request/reply exchange. Runs in a spawn_blocking thread.
fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<(), EchoError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| EchoError::Network(format!("failed to create ICMP socket: {}", e)))?;

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| EchoError::Network(format!("failed to set timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| EchoError::Network(format!("failed to set timeout: {}", e)))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| EchoError::Network(format!("failed to connect: {}", e)))?;

    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(ip.is_ipv6(), identifier, sequence);

    let start = Instant::now();

    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            EchoError::Network(format!("Permission denied: {}", e))
        } else {
            EchoError::Network(format!("failed to send: {}", e))
        }
    })?;

    // Read until we see our own reply or the timeout runs out.
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut
            {
                EchoError::Timeout(timeout)
            } else {
                EchoError::Network(format!("failed to receive: {}", e))
            }
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if start.elapsed() >= timeout {
            return Err(EchoError::Timeout(timeout));
        }

        if is_matching_reply(ip.is_ipv6(), buf, identifier, sequence) {
            return Ok(());
        }
        // Someone else's packet, keep waiting.
    }
}

/// Build an ICMP(v6) Echo Request (type 8 for v4, 128 for v6, code 0).
fn build_echo_request(ipv6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = if ipv6 { 128 } else { 8 };
    packet[1] = 0; // Code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    // The kernel computes the ICMPv6 checksum for datagram sockets.
    if !ipv6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Check a received packet for our Echo Reply (type 0 for v4, 129 for v6).
fn is_matching_reply(ipv6: bool, buf: &[u8], identifier: u16, sequence: u16) -> bool {
    // RAW v4 sockets deliver the IP header too; DGRAM delivers bare ICMP.
    let offset = if !ipv6 && !buf.is_empty() && buf[0] >> 4 == 4 {
        20
    } else {
        0
    };
    if buf.len() < offset + 8 {
        return false;
    }

    let expected_type = if ipv6 { 129 } else { 0 };
    let reply_id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
    let reply_seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);

    buf[offset] == expected_type && reply_id == identifier && reply_seq == sequence
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i < data.len() - 1 {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }

    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Reachability via the system `ping` binary (fallback).
async fn ping_command(address: &str, timeout: Duration) -> Result<(), EchoError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| EchoError::Command(format!("failed to execute ping: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("timeout")
        || stdout.contains("100% packet loss")
        || stdout.contains("100.0% packet loss")
    {
        return Err(EchoError::Timeout(timeout));
    }
    Err(EchoError::Command(format!("ping failed: {}", stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8; // Echo request
        packet[4] = 0x12;
        packet[5] = 0x34;
        packet[7] = 0x01;

        let checksum = icmp_checksum(&packet);
        assert_ne!(checksum, 0);
    }

    #[test]
    fn test_build_echo_request_v4() {
        let packet = build_echo_request(false, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8); // Type
        assert_eq!(packet[1], 0); // Code
        assert_eq!(packet[4..6], [0x12, 0x34]); // ID
        assert_eq!(packet[6..8], [0x00, 0x01]); // Sequence
        assert_ne!(&packet[2..4], &[0, 0]); // Checksum filled in
    }

    #[test]
    fn test_build_echo_request_v6() {
        let packet = build_echo_request(true, 0xBEEF, 7);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[2..4], [0, 0]); // Checksum left to the kernel
        assert_eq!(packet[4..6], [0xBE, 0xEF]);
    }

    #[test]
    fn test_matching_reply_bare_icmp() {
        let mut reply = vec![0u8; 8];
        reply[0] = 0; // Echo reply
        reply[4..6].copy_from_slice(&0x1234u16.to_be_bytes());
        reply[6..8].copy_from_slice(&9u16.to_be_bytes());

        assert!(is_matching_reply(false, &reply, 0x1234, 9));
        assert!(!is_matching_reply(false, &reply, 0x1234, 10));
        assert!(!is_matching_reply(false, &reply, 0x4321, 9));
    }

    #[test]
    fn test_matching_reply_with_ip_header() {
        let mut reply = vec![0u8; 28];
        reply[0] = 0x45; // IPv4, 20 byte header
        reply[20] = 0; // Echo reply
        reply[24..26].copy_from_slice(&0x1234u16.to_be_bytes());
        reply[26..28].copy_from_slice(&3u16.to_be_bytes());

        assert!(is_matching_reply(false, &reply, 0x1234, 3));
    }

    #[test]
    fn test_short_packet_is_not_a_reply() {
        assert!(!is_matching_reply(false, &[0u8; 4], 1, 1));
        assert!(!is_matching_reply(true, &[0u8; 4], 1, 1));
    }
}
