// Host configuration
//
// Values only: the host never reads the environment itself. The CLI
// builds a HostConfig from flags, environment and an optional JSON file.

use crate::fmsg::address::is_valid_hostname;
use crate::fmsg::error::{FmsgError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known port hosts listen on
pub const DEFAULT_PORT: u16 = 36900;

/// Data directory used when none is configured, relative to the working directory
pub const DEFAULT_DATA_DIR: &str = "fmsgdata";

/// Default maximum accepted body size in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 10 * 1024;

/// Configuration consumed by the host and store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address the listener binds to
    pub listen_ip: IpAddr,
    /// Port the listener binds to
    pub port: u16,
    /// Port dialled on remote hosts, including challenge connections
    pub remote_port: u16,
    /// Domain served by this host
    pub domain: String,
    /// Largest body accepted, in bytes
    pub max_message_size: u32,
    /// Accept messages flagged to skip the challenge
    pub allow_skip_challenge: bool,
    /// Root for outgoing bodies and recipient mailboxes
    pub data_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// How far in the future a message timestamp may be
    pub max_future_skew_secs: i64,
    /// Oldest message timestamp accepted, unlimited when unset
    pub max_message_age_secs: Option<i64>,
    /// Create missing mailbox directories on delivery
    pub create_mailboxes: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            remote_port: DEFAULT_PORT,
            domain: "localhost".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            allow_skip_challenge: false,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            connect_timeout_ms: 2_000,
            send_timeout_ms: 2_000,
            receive_timeout_ms: 2_000,
            max_future_skew_secs: 300,
            max_message_age_secs: None,
            create_mailboxes: true,
        }
    }
}

impl HostConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: HostConfig = serde_json::from_str(&text)
            .map_err(|e| FmsgError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_hostname(&self.domain) {
            return Err(FmsgError::Config(format!("invalid domain: {:?}", self.domain)));
        }
        if self.max_message_size == 0 {
            return Err(FmsgError::Config("max_message_size must be positive".to_string()));
        }
        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 || self.receive_timeout_ms == 0 {
            return Err(FmsgError::Config("timeouts must be positive".to_string()));
        }
        if self.max_future_skew_secs < 0 {
            return Err(FmsgError::Config("max_future_skew_secs must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Scratch directory for bodies being received
    pub fn incoming_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }
}
