//! Container runtime access.
//!
//! The controller only talks to the runtime through [`RuntimeClient`], so the
//! engine can be driven by a fake in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::ListContainersOptions;
use bollard::errors::Error as BollardError;
use bollard::network::{InspectNetworkOptions, ListNetworksOptions};
use bollard::system::EventsOptions;
use chrono::{DateTime, Utc};
use dockwall_common::{WallError, WallResult};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::events::RuntimeEvent;
use crate::model::{ContainerConfig, NetworkConfig};

/// Read access to the container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// All networks.
    async fn networks(&self) -> WallResult<Vec<NetworkConfig>>;

    /// All running containers.
    async fn containers(&self) -> WallResult<Vec<ContainerConfig>>;

    /// One network by id, `None` if it is gone.
    async fn network(&self, id: &str) -> WallResult<Option<NetworkConfig>>;

    /// One network by name, `None` if it does not exist.
    async fn network_by_name(&self, name: &str) -> WallResult<Option<NetworkConfig>>;

    /// One running container by id, `None` if it is not running.
    async fn container(&self, id: &str) -> WallResult<Option<ContainerConfig>>;

    /// Stream of relevant lifecycle events raised at or after `since`.
    /// Irrelevant events are skipped.
    fn events(&self, since: DateTime<Utc>) -> BoxStream<'static, WallResult<RuntimeEvent>>;
}

/// [`RuntimeClient`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket) and ping.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::Connection`] if the daemon cannot be reached.
    pub async fn connect() -> WallResult<Self> {
        let connection = |e: BollardError| WallError::Connection {
            message: e.to_string(),
        };
        let docker = Docker::connect_with_local_defaults().map_err(connection)?;
        docker.ping().await.map_err(connection)?;

        tracing::info!("Connected to docker");
        Ok(Self { docker })
    }

    /// Wrap an existing handle.
    #[must_use]
    pub const fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn inspect_network(&self, name_or_id: &str) -> WallResult<Option<NetworkConfig>> {
        match self
            .docker
            .inspect_network(name_or_id, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => NetworkConfig::from_model(network).map(Some),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(WallError::runtime(e)),
        }
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn networks(&self) -> WallResult<Vec<NetworkConfig>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(WallError::runtime)?;
        networks.into_iter().map(NetworkConfig::from_model).collect()
    }

    async fn containers(&self) -> WallResult<Vec<ContainerConfig>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(WallError::runtime)?;
        containers
            .into_iter()
            .map(ContainerConfig::from_model)
            .collect()
    }

    async fn network(&self, id: &str) -> WallResult<Option<NetworkConfig>> {
        self.inspect_network(id).await
    }

    async fn network_by_name(&self, name: &str) -> WallResult<Option<NetworkConfig>> {
        self.inspect_network(name).await
    }

    async fn container(&self, id: &str) -> WallResult<Option<ContainerConfig>> {
        let filters = HashMap::from([("id".to_string(), vec![id.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(WallError::runtime)?;
        containers
            .into_iter()
            .next()
            .map(ContainerConfig::from_model)
            .transpose()
    }

    fn events(&self, since: DateTime<Utc>) -> BoxStream<'static, WallResult<RuntimeEvent>> {
        let filters = HashMap::from([(
            "type".to_string(),
            vec!["container".to_string(), "network".to_string()],
        )]);
        self.docker
            .clone()
            .events(Some(EventsOptions {
                // The request is only sent on first poll; the daemon replays from here.
                since: Some(since.timestamp().to_string()),
                filters,
                ..Default::default()
            }))
            .filter_map(|message| async move {
                match message {
                    Ok(message) => RuntimeEvent::from_message(message).map(Ok),
                    Err(e) => Some(Err(WallError::runtime(e))),
                }
            })
            .boxed()
    }
}
