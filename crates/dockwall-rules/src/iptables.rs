//! Running commands through the `iptables` and `ip6tables` binaries.

use std::process::Command;

use dockwall_common::{IpFamily, WallError, WallResult};

use crate::apply::{Firewall, FirewallCommand};

/// Executes firewall commands as subprocesses.
#[derive(Debug, Clone)]
pub struct IptablesFirewall {
    iptables: String,
    ip6tables: String,
    pretend: bool,
}

impl Default for IptablesFirewall {
    fn default() -> Self {
        Self {
            iptables: IpFamily::V4.binary().to_string(),
            ip6tables: IpFamily::V6.binary().to_string(),
            pretend: false,
        }
    }
}

impl IptablesFirewall {
    /// Create a runner using the default binaries from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the binaries used per family.
    #[must_use]
    pub fn with_binaries(mut self, iptables: impl Into<String>, ip6tables: impl Into<String>) -> Self {
        self.iptables = iptables.into();
        self.ip6tables = ip6tables.into();
        self
    }

    /// Only log commands instead of running them.
    #[must_use]
    pub const fn pretend(mut self, pretend: bool) -> Self {
        self.pretend = pretend;
        self
    }

    /// Binary used for `family`.
    #[must_use]
    pub fn binary(&self, family: IpFamily) -> &str {
        match family {
            IpFamily::V4 => &self.iptables,
            IpFamily::V6 => &self.ip6tables,
        }
    }

    /// Full command line, for logs and errors.
    #[must_use]
    pub fn command_line(&self, command: &FirewallCommand) -> String {
        format!("{} {}", self.binary(command.family), command.args().join(" "))
    }
}

impl Firewall for IptablesFirewall {
    fn execute(&mut self, command: &FirewallCommand) -> WallResult<()> {
        let line = self.command_line(command);

        if self.pretend {
            tracing::info!(command = %line, "Pretending to run");
            return Ok(());
        }

        tracing::info!(command = %line, "Running");
        let output = Command::new(self.binary(command.family))
            .args(command.args())
            .output()
            .map_err(|e| WallError::Firewall {
                command: line.clone(),
                stderr: format!("Failed to execute: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WallError::Firewall {
                command: line,
                stderr: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Place;

    #[test]
    fn command_line_uses_configured_binary() {
        let fw = IptablesFirewall::new().with_binaries("/sbin/iptables-legacy", "/sbin/ip6tables-legacy");
        let flush = FirewallCommand::flush(IpFamily::V6, Place::NAT_DOCKER);
        assert_eq!(fw.command_line(&flush), "/sbin/ip6tables-legacy -t nat -F DOCKER");
    }

    #[test]
    fn pretend_mode_runs_nothing() {
        let mut fw = IptablesFirewall::new()
            .with_binaries("/nonexistent/iptables", "/nonexistent/ip6tables")
            .pretend(true);
        let flush = FirewallCommand::flush(IpFamily::V4, Place::FILTER_DOCKER);
        assert!(fw.execute(&flush).is_ok());
    }

    #[test]
    fn missing_binary_is_a_firewall_error() {
        let mut fw = IptablesFirewall::new().with_binaries("/nonexistent/iptables", "/nonexistent/ip6tables");
        let flush = FirewallCommand::flush(IpFamily::V4, Place::FILTER_DOCKER);
        let err = fw.execute(&flush).unwrap_err();
        assert!(matches!(err, WallError::Firewall { .. }));
        assert!(err.to_string().contains("/nonexistent/iptables -t filter -F DOCKER"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_firewall_error() {
        let mut fw = IptablesFirewall::new().with_binaries("false", "false");
        let flush = FirewallCommand::flush(IpFamily::V4, Place::FILTER_DOCKER);
        assert!(matches!(
            fw.execute(&flush).unwrap_err(),
            WallError::Firewall { .. }
        ));
    }
}
