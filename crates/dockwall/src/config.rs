//! Daemon settings.

use std::io::ErrorKind;
use std::path::Path;

use dockwall_common::{IpFamily, WallError, WallResult};
use serde::{Deserialize, Serialize};

use crate::controller::DEFAULT_GATEWAY_BRIDGE;

/// Settings read from the TOML configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Log firewall commands instead of running them.
    pub pretend: bool,
    /// IPv4 firewall binary.
    pub iptables: String,
    /// IPv6 firewall binary.
    pub ip6tables: String,
    /// Name of the implicit gateway bridge network.
    pub gateway_bridge: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pretend: false,
            iptables: IpFamily::V4.binary().to_string(),
            ip6tables: IpFamily::V6.binary().to_string(),
            gateway_bridge: DEFAULT_GATEWAY_BRIDGE.to_string(),
        }
    }
}

impl Settings {
    /// Load from `path`, falling back to defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> WallResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| WallError::Config {
                message: format!("Failed to parse {}: {e}", path.display()),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
