//! Command line interface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use dockwall_common::WallResult;
use dockwall_rules::IptablesFirewall;

use crate::config::Settings;
use crate::controller::Controller;
use crate::docker::DockerClient;

/// dockwall - keeps iptables in sync with Docker networks and containers
#[derive(Debug, Parser)]
#[command(name = "dockwall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Only log firewall commands, do not run them
    #[arg(long, env = "DOCKWALL_PRETEND")]
    pub pretend: bool,

    /// Path to the configuration file
    #[arg(
        long,
        env = "DOCKWALL_CONFIG",
        default_value = "/etc/dockwall.toml"
    )]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// IPv4 firewall binary
    #[arg(long, value_name = "PATH")]
    pub iptables: Option<String>,

    /// IPv6 firewall binary
    #[arg(long, value_name = "PATH")]
    pub ip6tables: Option<String>,
}

impl Cli {
    /// Settings from the configuration file with flags applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn settings(&self) -> WallResult<Settings> {
        let mut settings = Settings::load(&self.config)?;
        settings.pretend |= self.pretend;
        if let Some(iptables) = &self.iptables {
            settings.iptables.clone_from(iptables);
        }
        if let Some(ip6tables) = &self.ip6tables {
            settings.ip6tables.clone_from(ip6tables);
        }
        Ok(settings)
    }

    /// Log filter directive for the crate.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        if self.debug {
            "dockwall=debug"
        } else {
            "dockwall=info"
        }
    }

    /// Connect to the runtime and reconcile until its event stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime is unreachable or reconciliation fails.
    pub async fn execute(self) -> Result<()> {
        let settings = self.settings()?;
        tracing::debug!(?settings, "Loaded settings");

        let client = Arc::new(DockerClient::connect().await?);
        let firewall = IptablesFirewall::new()
            .with_binaries(settings.iptables, settings.ip6tables)
            .pretend(settings.pretend);

        Controller::new(client, firewall)
            .with_gateway_bridge(settings.gateway_bridge)
            .run()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockwall.toml");
        std::fs::write(&path, "iptables = \"/sbin/iptables-legacy\"\ngateway_bridge = \"gw\"\n").unwrap();

        let cli = Cli::parse_from([
            "dockwall",
            "--pretend",
            "--config",
            path.to_str().unwrap(),
            "--ip6tables",
            "/sbin/ip6tables-nft",
        ]);
        let settings = cli.settings().unwrap();
        assert!(settings.pretend);
        assert_eq!(settings.iptables, "/sbin/iptables-legacy");
        assert_eq!(settings.ip6tables, "/sbin/ip6tables-nft");
        assert_eq!(settings.gateway_bridge, "gw");
        assert_eq!(cli.log_directive(), "dockwall=info");
    }
}
