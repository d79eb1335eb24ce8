//! Configuration module for PingTrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Which reachability probe variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Icmp,
    Simulated,
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "icmp" => Ok(ProbeKind::Icmp),
            "simulated" => Ok(ProbeKind::Simulated),
            other => Err(format!("unknown probe kind: {}", other)),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Directory holding the active and rotated log files (default: "pinglog")
    pub log_dir: PathBuf,
    /// Rows per log file before rotation (default: 1000)
    pub max_rows_per_file: usize,
    /// Maximum concurrently monitored addresses (default: 3)
    pub max_sessions: usize,
    /// Capacity of the bounded write queue (default: 1024)
    pub queue_capacity: usize,
    /// Probe variant (default: icmp)
    pub probe: ProbeKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            log_dir: PathBuf::from("pinglog"),
            max_rows_per_file: 1000,
            max_sessions: 3,
            queue_capacity: 1024,
            probe: ProbeKind::Icmp,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PINGTRAIL_LOG_DIR`: log directory path (default: "pinglog")
    /// - `PINGTRAIL_MAX_ROWS`: rows per file before rotation (default: 1000)
    /// - `PINGTRAIL_MAX_SESSIONS`: concurrent session cap (default: 3)
    /// - `PINGTRAIL_QUEUE_CAPACITY`: write queue capacity (default: 1024)
    /// - `PINGTRAIL_PROBE`: `icmp` or `simulated` (default: icmp)
    ///
    /// Unparsable values fall back to the default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env_parse("PINGTRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Ok(dir) = env::var("PINGTRAIL_LOG_DIR") {
            cfg.log_dir = PathBuf::from(dir);
        }
        if let Some(rows) = env_parse("PINGTRAIL_MAX_ROWS") {
            cfg.max_rows_per_file = rows;
        }
        if let Some(sessions) = env_parse("PINGTRAIL_MAX_SESSIONS") {
            cfg.max_sessions = sessions;
        }
        if let Some(capacity) = env_parse("PINGTRAIL_QUEUE_CAPACITY") {
            cfg.queue_capacity = capacity;
        }
        if let Some(probe) = env_parse("PINGTRAIL_PROBE") {
            cfg.probe = probe;
        }

        cfg
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.log_dir, PathBuf::from("pinglog"));
        assert_eq!(cfg.max_rows_per_file, 1000);
        assert_eq!(cfg.max_sessions, 3);
        assert_eq!(cfg.queue_capacity, 1024);
        assert_eq!(cfg.probe, ProbeKind::Icmp);
    }

    #[test]
    fn test_probe_kind_parsing() {
        assert_eq!("icmp".parse(), Ok(ProbeKind::Icmp));
        assert_eq!("Simulated".parse(), Ok(ProbeKind::Simulated));
        assert!("carrier-pigeon".parse::<ProbeKind>().is_err());
    }
}
