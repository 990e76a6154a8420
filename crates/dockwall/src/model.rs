//! Immutable projections of runtime networks and containers.
//!
//! Runtime payloads are parsed here once; nothing else in the crate reads
//! raw API shapes.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bollard::models::{ContainerSummary, EndpointSettings, Network, NetworkContainer, Port};
use chrono::{DateTime, FixedOffset, Utc};
use dockwall_common::{IpAddress, IpFamily, WallError, WallResult};

const OPTION_MASQUERADE: &str = "com.docker.network.bridge.enable_ip_masquerade";
const OPTION_ICC: &str = "com.docker.network.bridge.enable_icc";
const OPTION_DEFAULT_BRIDGE: &str = "com.docker.network.bridge.default_bridge";
const OPTION_BRIDGE_NAME: &str = "com.docker.network.bridge.name";

/// Network driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkDriver {
    /// Linux bridge with NAT.
    Bridge,
    /// Multi-host overlay.
    Overlay,
    /// No networking.
    Null,
    /// Host networking.
    Host,
    /// Anything else (plugins, macvlan, ...).
    Other(String),
}

impl From<&str> for NetworkDriver {
    fn from(driver: &str) -> Self {
        match driver {
            "bridge" => Self::Bridge,
            "overlay" => Self::Overlay,
            "null" => Self::Null,
            "host" => Self::Host,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Overlay => write!(f, "overlay"),
            Self::Null => write!(f, "null"),
            Self::Host => write!(f, "host"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Options only bridge networks carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Masquerade traffic leaving the bridge.
    pub masquerade: bool,
    /// Allow traffic between containers on the bridge.
    pub icc: bool,
    /// This is the runtime's default `bridge` network.
    pub default_bridge: bool,
    /// Explicit host interface name.
    pub name: Option<String>,
}

/// Addresses of one container on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Network id.
    pub network_id: String,
    /// IPv4 address, if assigned.
    pub ipv4: Option<IpAddress>,
    /// IPv6 address, if assigned.
    pub ipv6: Option<IpAddress>,
}

impl Attachment {
    /// Address of one family.
    #[must_use]
    pub const fn address(&self, family: IpFamily) -> Option<IpAddress> {
        match family {
            IpFamily::V4 => self.ipv4,
            IpFamily::V6 => self.ipv6,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn bool_option(options: &HashMap<String, String>, name: &str, default: bool) -> bool {
    options.get(name).map_or(default, |value| value == "true")
}

/// Projection of one runtime network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network id.
    pub id: String,
    /// Human name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<FixedOffset>,
    /// Driver kind.
    pub driver: NetworkDriver,
    /// IPv6 is enabled.
    pub ipv6: bool,
    /// Swarm ingress network.
    pub ingress: bool,
    /// Standalone containers may attach.
    pub attachable: bool,
    /// Bridge options, `None` for other drivers.
    pub bridge: Option<BridgeOptions>,
    /// Subnets, v4 and v6 mixed in reported order.
    pub subnets: Vec<String>,
    /// Attached containers by id. Only populated when inspecting a network.
    pub containers: HashMap<String, Attachment>,
}

impl NetworkConfig {
    /// Parse a runtime network.
    ///
    /// # Errors
    ///
    /// Returns an error if the id, name, driver or creation time is missing or invalid.
    pub fn from_model(network: Network) -> WallResult<Self> {
        let missing = |field| WallError::MissingField {
            resource: "network",
            field,
        };
        let id = non_empty(network.id).ok_or_else(|| missing("Id"))?;
        let name = network.name.ok_or_else(|| missing("Name"))?;
        let driver = NetworkDriver::from(network.driver.ok_or_else(|| missing("Driver"))?.as_str());
        let created = network.created.ok_or_else(|| missing("Created"))?;
        let created_at = DateTime::parse_from_rfc3339(&created).map_err(|e| WallError::Runtime {
            message: format!("Invalid creation time {created:?} of network {id}: {e}"),
        })?;

        let options = network.options.unwrap_or_default();
        let bridge = (driver == NetworkDriver::Bridge).then(|| BridgeOptions {
            masquerade: bool_option(&options, OPTION_MASQUERADE, true),
            icc: bool_option(&options, OPTION_ICC, true),
            default_bridge: bool_option(&options, OPTION_DEFAULT_BRIDGE, false),
            name: options.get(OPTION_BRIDGE_NAME).cloned(),
        });

        let subnets = network
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|config| non_empty(config.subnet))
            .collect();

        let containers = network
            .containers
            .unwrap_or_default()
            .into_iter()
            .map(|(container_id, endpoint)| {
                let attachment = Self::attachment(&id, endpoint)?;
                Ok((container_id, attachment))
            })
            .collect::<WallResult<_>>()?;

        Ok(Self {
            id,
            name,
            created_at,
            driver,
            ipv6: network.enable_ipv6.unwrap_or(false),
            ingress: network.ingress.unwrap_or(false),
            attachable: network.attachable.unwrap_or(false),
            bridge,
            subnets,
            containers,
        })
    }

    fn attachment(network_id: &str, endpoint: NetworkContainer) -> WallResult<Attachment> {
        let parse = |value: Option<String>| non_empty(value).map(|v| v.parse::<IpAddress>()).transpose();
        Ok(Attachment {
            network_id: network_id.to_string(),
            ipv4: parse(endpoint.ipv4_address)?,
            ipv6: parse(endpoint.ipv6_address)?,
        })
    }

    /// Whether this is a bridge network.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.driver == NetworkDriver::Bridge
    }

    /// First 12 characters of the id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }

    /// Host interface of the network.
    ///
    /// Bridge networks use the explicit bridge name option or `br-<short id>`.
    /// Non-attachable networks of other drivers have no interface.
    ///
    /// # Errors
    ///
    /// Returns [`WallError::UnsupportedNetwork`] for attachable non-bridge networks.
    pub fn iface(&self) -> WallResult<Option<String>> {
        if let Some(bridge) = &self.bridge {
            return Ok(Some(
                bridge
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("br-{}", self.short_id())),
            ));
        }
        if !self.attachable {
            return Ok(None);
        }
        Err(WallError::UnsupportedNetwork {
            network: self.id.clone(),
            driver: self.driver.to_string(),
        })
    }

    /// Masquerade is on for this bridge.
    #[must_use]
    pub fn masquerade(&self) -> bool {
        self.bridge.as_ref().is_some_and(|b| b.masquerade)
    }

    /// Containers on this bridge may talk to each other.
    #[must_use]
    pub fn icc(&self) -> bool {
        self.bridge.as_ref().is_some_and(|b| b.icc)
    }

    /// This is the runtime's default bridge.
    #[must_use]
    pub fn is_default_bridge(&self) -> bool {
        self.bridge.as_ref().is_some_and(|b| b.default_bridge)
    }

    /// Subnets of one family.
    pub fn subnets_of(&self, family: IpFamily) -> impl Iterator<Item = &str> {
        self.subnets
            .iter()
            .map(String::as_str)
            .filter(move |subnet| IpFamily::of_text(subnet) == family)
    }

    /// IPv4 subnets.
    #[must_use]
    pub fn ip4_subnets(&self) -> Vec<&str> {
        self.subnets_of(IpFamily::V4).collect()
    }

    /// IPv6 subnets.
    #[must_use]
    pub fn ip6_subnets(&self) -> Vec<&str> {
        self.subnets_of(IpFamily::V6).collect()
    }

    /// Whether rules of `family` are generated for this network.
    #[must_use]
    pub const fn supports(&self, family: IpFamily) -> bool {
        match family {
            IpFamily::V4 => true,
            IpFamily::V6 => self.ipv6,
        }
    }
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// TCP protocol.
    Tcp,
    /// UDP protocol.
    Udp,
    /// SCTP protocol.
    Sctp,
}

impl Protocol {
    /// The protocol string for iptables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl FromStr for Protocol {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "sctp" => Ok(Self::Sctp),
            other => Err(WallError::Runtime {
                message: format!("Unknown port protocol {other:?}"),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A published port. Ordered by protocol, host port, container port, host ip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortConfig {
    /// Protocol.
    pub protocol: Protocol,
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
    /// Host address the port is bound to; `None` means any.
    pub host_ip: Option<String>,
}

impl PortConfig {
    fn from_model(port: Port) -> WallResult<Option<Self>> {
        let Some(host_port) = port.public_port else {
            return Ok(None);
        };
        let protocol = port
            .typ
            .map(|typ| typ.to_string())
            .filter(|typ| !typ.is_empty())
            .as_deref()
            .unwrap_or("tcp")
            .parse()?;
        let host_ip = non_empty(port.ip).filter(|ip| ip != "0.0.0.0" && ip != "::");
        Ok(Some(Self {
            protocol,
            host_port,
            container_port: port.private_port,
            host_ip,
        }))
    }

    /// Whether traffic of `family` reaches this port.
    #[must_use]
    pub fn accepts(&self, family: IpFamily) -> bool {
        self.host_ip
            .as_deref()
            .is_none_or(|ip| IpFamily::of_text(ip) == family)
    }
}

/// Projection of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Container id.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Published ports, without duplicates, sorted.
    pub ports: Vec<PortConfig>,
    /// Attachments in the order the runtime reports them.
    pub networks: Vec<Attachment>,
}

impl ContainerConfig {
    /// Parse a runtime container summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or creation time is missing, or an address is invalid.
    pub fn from_model(container: ContainerSummary) -> WallResult<Self> {
        let missing = |field| WallError::MissingField {
            resource: "container",
            field,
        };
        let id = non_empty(container.id).ok_or_else(|| missing("Id"))?;
        let created = container.created.ok_or_else(|| missing("Created"))?;
        let created_at = DateTime::from_timestamp(created, 0).ok_or_else(|| WallError::Runtime {
            message: format!("Invalid creation time {created} of container {id}"),
        })?;

        let mut ports: Vec<PortConfig> = Vec::new();
        for port in container.ports.unwrap_or_default() {
            if let Some(port) = PortConfig::from_model(port)? {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
        // The runtime builds this list from a map, its order is not stable.
        ports.sort();

        let mut endpoints: Vec<(String, EndpointSettings)> = container
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .collect();
        // The runtime reports attachments keyed by network name, sorted.
        endpoints.sort_by(|(a, _), (b, _)| a.cmp(b));

        let networks = endpoints
            .into_iter()
            .filter_map(|(_, endpoint)| Self::attachment(endpoint).transpose())
            .collect::<WallResult<_>>()?;

        Ok(Self {
            id,
            created_at,
            ports,
            networks,
        })
    }

    fn attachment(endpoint: EndpointSettings) -> WallResult<Option<Attachment>> {
        // Happens when the default bridge is disabled and no other network is used.
        let Some(network_id) = non_empty(endpoint.network_id) else {
            return Ok(None);
        };
        let ipv4 = non_empty(endpoint.ip_address)
            .map(|addr| IpAddress::with_prefix(&addr, endpoint.ip_prefix_len.unwrap_or(32)))
            .transpose()?;
        let ipv6 = non_empty(endpoint.global_ipv6_address)
            .map(|addr| IpAddress::with_prefix(&addr, endpoint.global_ipv6_prefix_len.unwrap_or(128)))
            .transpose()?;
        Ok(Some(Attachment {
            network_id,
            ipv4,
            ipv6,
        }))
    }

    /// Attachment to one network.
    #[must_use]
    pub fn attachment_to(&self, network_id: &str) -> Option<&Attachment> {
        self.networks.iter().find(|a| a.network_id == network_id)
    }
}
