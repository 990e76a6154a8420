//! Reconciliation of runtime state into firewall rules.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use dockwall_common::WallResult;
use dockwall_rules::{BlockKey, Firewall, RuleSet, apply_diff, bootstrap};
use futures::StreamExt;

use crate::docker::RuntimeClient;
use crate::events::RuntimeEvent;
use crate::generate::{self, NETWORK_TAG};
use crate::model::{ContainerConfig, NetworkConfig};

/// Default name of the implicit gateway bridge network.
pub const DEFAULT_GATEWAY_BRIDGE: &str = "docker_gwbridge";

/// Owns the desired rule state and keeps the live firewall in line with it.
///
/// Events are handled one at a time; every event is reconciled into a single
/// diff which is applied before the next event is read.
pub struct Controller<C, F> {
    client: Arc<C>,
    firewall: F,
    rules: RuleSet,
    networks: BTreeMap<String, NetworkConfig>,
    containers: HashMap<String, ContainerConfig>,
    gateway_bridge_name: String,
    gateway_bridge: Option<NetworkConfig>,
    // The runtime does not report gateway bridge attachments.
    gateway_bridge_dirty: bool,
}

impl<C: RuntimeClient, F: Firewall> Controller<C, F> {
    /// Create a controller with nothing known yet.
    pub fn new(client: Arc<C>, firewall: F) -> Self {
        Self {
            client,
            firewall,
            rules: RuleSet::new(),
            networks: BTreeMap::new(),
            containers: HashMap::new(),
            gateway_bridge_name: DEFAULT_GATEWAY_BRIDGE.to_string(),
            gateway_bridge: None,
            gateway_bridge_dirty: true,
        }
    }

    /// Use a different gateway bridge network name.
    #[must_use]
    pub fn with_gateway_bridge(mut self, name: impl Into<String>) -> Self {
        self.gateway_bridge_name = name.into();
        self
    }

    /// The firewall rules are applied to.
    pub const fn firewall(&self) -> &F {
        &self.firewall
    }

    /// Desired rule state.
    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Known networks by id.
    pub const fn networks(&self) -> &BTreeMap<String, NetworkConfig> {
        &self.networks
    }

    /// Known containers by id.
    pub const fn containers(&self) -> &HashMap<String, ContainerConfig> {
        &self.containers
    }

    /// Scan the runtime and install the full rule set.
    ///
    /// Every managed chain is flushed and refilled, so this can be repeated.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried, rule generation fails
    /// or a firewall command fails.
    pub async fn bootstrap(&mut self) -> WallResult<()> {
        self.rules
            .set_generated(BlockKey::Static, generate::static_rules())?;

        let mut networks = self.client.networks().await?;
        networks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for network in networks {
            self.add_network(network)?;
        }

        let mut containers = self.client.containers().await?;
        containers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        for container in containers {
            self.add_container(container).await?;
        }

        let commands = bootstrap(&mut self.firewall, &self.rules)?;
        tracing::info!(
            networks = self.networks.len(),
            containers = self.containers.len(),
            commands,
            "Bootstrap complete"
        );
        Ok(())
    }

    /// Reconcile one event and apply the resulting diff.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried, rule generation fails
    /// or a firewall command fails.
    pub async fn handle_event(&mut self, event: RuntimeEvent) -> WallResult<()> {
        tracing::debug!(?event, "Handling event");
        let pending = self.rules.diff()?;

        match event {
            RuntimeEvent::ContainerStart { id } => {
                self.gateway_bridge_dirty = true;
                match self.client.container(&id).await? {
                    Some(container) => self.add_container(container).await?,
                    None => tracing::debug!(container = %id, "Started container is gone"),
                }
            }
            RuntimeEvent::ContainerStop { id } => self.remove_container(&id),
            RuntimeEvent::NetworkCreate { id } => match self.client.network(&id).await? {
                Some(network) => self.add_network(network)?,
                None => tracing::debug!(network = %id, "Created network is gone"),
            },
            RuntimeEvent::NetworkDestroy { id } => self.remove_network(&id),
            RuntimeEvent::NetworkConnect { container, .. }
            | RuntimeEvent::NetworkDisconnect { container, .. } => {
                self.gateway_bridge_dirty = true;
                if self.containers.contains_key(&container) {
                    match self.client.container(&container).await? {
                        Some(config) => self.add_container(config).await?,
                        None => self.remove_container(&container),
                    }
                }
            }
        }

        let diff = pending.end(&self.rules)?;
        if diff.is_empty() {
            return Ok(());
        }
        apply_diff(&mut self.firewall, &diff)?;
        Ok(())
    }

    /// Bootstrap, then follow runtime events until the stream ends.
    ///
    /// Events are requested from before the scan started, so the runtime
    /// replays anything raised while it runs. A failing or ending stream stops
    /// the loop without error.
    ///
    /// # Errors
    ///
    /// Returns an error if bootstrapping or reconciling an event fails.
    pub async fn run(&mut self) -> WallResult<()> {
        let mut events = self.client.events(Utc::now());
        self.bootstrap().await?;

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => self.handle_event(event).await?,
                Err(e) => {
                    tracing::info!(error = %e, "Event stream failed, stopping");
                    return Ok(());
                }
            }
        }

        tracing::info!("Event stream ended, stopping");
        Ok(())
    }

    fn add_network(&mut self, network: NetworkConfig) -> WallResult<()> {
        let Some(generator) = generate::network_rules(&network)? else {
            tracing::debug!(network = %network.id, driver = %network.driver, "Skipping unmanaged network");
            self.networks.insert(network.id.clone(), network);
            return Ok(());
        };
        self.rules
            .set_generated(BlockKey::Network(network.id.clone()), generator)?;

        for other in self.networks.values() {
            if other.id == network.id || !generate::is_managed(other) {
                continue;
            }
            // A pair seen before keeps its key and rule order.
            let reverse = BlockKey::Isolation(other.id.clone(), network.id.clone());
            let (key, generator) = if self.rules.block(&reverse).is_some() {
                (reverse, generate::isolation_rules(other, &network)?)
            } else {
                (
                    BlockKey::Isolation(network.id.clone(), other.id.clone()),
                    generate::isolation_rules(&network, other)?,
                )
            };
            if let Some(generator) = generator {
                self.rules.set_generated(key, generator)?;
            }
        }

        tracing::info!(network = %network.id, name = %network.name, "Network added");
        self.networks.insert(network.id.clone(), network);
        Ok(())
    }

    fn remove_network(&mut self, id: &str) {
        let removed = self.rules.remove_block(&BlockKey::Network(id.to_string()));
        let isolation = self.rules.remove_by_tag(NETWORK_TAG, id);
        let known = self.networks.remove(id).is_some();
        if removed || known {
            tracing::info!(network = %id, isolation, "Network removed");
        }
    }

    async fn add_container(&mut self, container: ContainerConfig) -> WallResult<()> {
        if !generate::has_bridge_attachment(&container, &self.networks) {
            self.refresh_gateway_bridge().await?;
        }
        let generator =
            generate::container_rules(&container, &self.networks, self.gateway_bridge.as_ref())?;
        self.rules
            .set_generated(BlockKey::Container(container.id.clone()), generator)?;

        tracing::info!(container = %container.id, ports = container.ports.len(), "Container added");
        self.containers.insert(container.id.clone(), container);
        Ok(())
    }

    fn remove_container(&mut self, id: &str) {
        let removed = self.rules.remove_block(&BlockKey::Container(id.to_string()));
        if self.containers.remove(id).is_some() || removed {
            tracing::info!(container = %id, "Container removed");
        }
    }

    async fn refresh_gateway_bridge(&mut self) -> WallResult<()> {
        if !self.gateway_bridge_dirty {
            return Ok(());
        }
        self.gateway_bridge = self
            .client
            .network_by_name(&self.gateway_bridge_name)
            .await?;
        self.gateway_bridge_dirty = false;
        tracing::debug!(
            name = %self.gateway_bridge_name,
            found = self.gateway_bridge.is_some(),
            "Refreshed gateway bridge"
        );
        Ok(())
    }
}
