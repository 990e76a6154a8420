//! Rule generation for networks and containers.

use std::collections::{BTreeMap, HashSet};

use dockwall_common::{IpAddress, IpFamily, WallResult};
use dockwall_rules::{Group, Place, RuleGenerator};

use crate::model::{Attachment, ContainerConfig, NetworkConfig, PortConfig, Protocol};

/// Tag carrying the ids of the networks an isolation rule separates.
pub const NETWORK_TAG: &str = "network";

/// Whether rules are generated for `network` at all.
#[must_use]
pub fn is_managed(network: &NetworkConfig) -> bool {
    network.is_bridge() && !network.ingress
}

/// Rules that are always present, independent of runtime state.
#[must_use]
pub fn static_rules() -> RuleGenerator {
    let mut generator = RuleGenerator::new();
    generator
        .define(Place::FILTER_ISOLATION, "-j RETURN")
        .any_family()
        .group(Group::Last);
    generator
}

/// NAT and forwarding rules for one bridge network.
///
/// Returns `None` for networks that are not managed.
///
/// # Errors
///
/// Propagates interface resolution failures.
pub fn network_rules(network: &NetworkConfig) -> WallResult<Option<RuleGenerator>> {
    if !is_managed(network) {
        return Ok(None);
    }
    let Some(iface) = network.iface()? else {
        return Ok(None);
    };

    let mut generator = RuleGenerator::new();
    generator
        .define(
            Place::NAT_POSTROUTING,
            format!("-o {iface} -m addrtype --src-type LOCAL -j MASQUERADE"),
        )
        .ipv6(network.ipv6);

    // The default bridge expects NAT even with masquerading disabled.
    if network.masquerade() || network.is_default_bridge() {
        for family in IpFamily::ALL {
            if !network.supports(family) {
                continue;
            }
            for subnet in network.subnets_of(family) {
                generator
                    .define(
                        Place::NAT_POSTROUTING,
                        format!("-s {subnet} ! -o {iface} -j MASQUERADE"),
                    )
                    .family(family);
            }
        }
    }

    let icc = if network.icc() { "ACCEPT" } else { "DROP" };
    for data in [
        format!("-o {iface} -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"),
        format!("-o {iface} -j DOCKER"),
        format!("-i {iface} ! -o {iface} -j ACCEPT"),
        format!("-i {iface} -o {iface} -j {icc}"),
    ] {
        generator
            .define(Place::FILTER_FORWARD, data)
            .ipv6(network.ipv6);
    }

    Ok(Some(generator))
}

/// Rules dropping forwarded traffic between two bridge networks, both ways.
///
/// # Errors
///
/// Propagates interface resolution failures.
pub fn isolation_rules(
    network: &NetworkConfig,
    other: &NetworkConfig,
) -> WallResult<Option<RuleGenerator>> {
    let (Some(a), Some(b)) = (network.iface()?, other.iface()?) else {
        return Ok(None);
    };
    let both_v6 = network.ipv6 && other.ipv6;

    let mut generator = RuleGenerator::new();
    for (from, to) in [(&a, &b), (&b, &a)] {
        generator
            .define(Place::FILTER_ISOLATION, format!("-i {from} -o {to} -j DROP"))
            .ipv6(both_v6)
            .tag(NETWORK_TAG, [network.id.as_str(), other.id.as_str()]);
    }
    Ok(Some(generator))
}

/// An address a container is reachable at, with the interface it sits behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Container address.
    pub address: IpAddress,
    /// Host interface of the owning network.
    pub iface: String,
}

fn bridge_attachments<'a>(
    container: &'a ContainerConfig,
    networks: &'a BTreeMap<String, NetworkConfig>,
) -> impl Iterator<Item = (&'a Attachment, &'a NetworkConfig)> {
    container.networks.iter().filter_map(|attachment| {
        networks
            .get(&attachment.network_id)
            .filter(|network| is_managed(network))
            .map(|network| (attachment, network))
    })
}

/// Whether the container sits on at least one managed bridge network.
#[must_use]
pub fn has_bridge_attachment(
    container: &ContainerConfig,
    networks: &BTreeMap<String, NetworkConfig>,
) -> bool {
    bridge_attachments(container, networks).next().is_some()
}

fn endpoint(
    attachment: &Attachment,
    network: &NetworkConfig,
    family: IpFamily,
) -> WallResult<Option<Endpoint>> {
    let Some(address) = attachment.address(family) else {
        return Ok(None);
    };
    Ok(network
        .iface()?
        .map(|iface| Endpoint { address, iface }))
}

/// Resolve the addresses published ports are forwarded to, v4 first.
///
/// Bridge attachments are scanned in reported order. An attachment carrying
/// both families wins for both; otherwise the first address of each family is
/// used. Without any bridge attachment the container's entry on the gateway
/// bridge is used.
///
/// # Errors
///
/// Propagates interface resolution failures.
pub fn resolve_endpoints(
    container: &ContainerConfig,
    networks: &BTreeMap<String, NetworkConfig>,
    gateway_bridge: Option<&NetworkConfig>,
) -> WallResult<Vec<Endpoint>> {
    let attached: Vec<_> = bridge_attachments(container, networks).collect();

    if attached.is_empty() {
        let Some(gateway) = gateway_bridge else {
            return Ok(Vec::new());
        };
        let Some(attachment) = gateway.containers.get(&container.id) else {
            return Ok(Vec::new());
        };
        let mut endpoints = Vec::new();
        for family in IpFamily::ALL {
            endpoints.extend(endpoint(attachment, gateway, family)?);
        }
        return Ok(endpoints);
    }

    if let Some((attachment, network)) = attached
        .iter()
        .find(|(attachment, _)| attachment.ipv4.is_some() && attachment.ipv6.is_some())
    {
        let mut endpoints = Vec::new();
        for family in IpFamily::ALL {
            endpoints.extend(endpoint(attachment, network, family)?);
        }
        return Ok(endpoints);
    }

    let mut endpoints = Vec::new();
    for family in IpFamily::ALL {
        if let Some((attachment, network)) = attached
            .iter()
            .find(|(attachment, _)| attachment.address(family).is_some())
        {
            endpoints.extend(endpoint(attachment, network, family)?);
        }
    }
    Ok(endpoints)
}

/// Container-side targets already covered, shared by every host port mapped to them.
type Served = HashSet<(IpAddress, Protocol, u16)>;

fn port_rules(
    generator: &mut RuleGenerator,
    served: &mut Served,
    port: &PortConfig,
    endpoint: &Endpoint,
) {
    let family = endpoint.address.family();
    let proto = port.protocol;
    let address = endpoint.address.host_route();
    let iface = &endpoint.iface;
    let (host_port, container_port) = (port.host_port, port.container_port);
    let first = served.insert((endpoint.address, proto, container_port));

    if first {
        generator
            .define(
                Place::NAT_POSTROUTING,
                format!(
                    "-s {address} -d {address} -p {proto} -m {proto} --dport {container_port} -j MASQUERADE"
                ),
            )
            .family(family)
            .group(Group::Container);
    }

    let destination = port
        .host_ip
        .as_ref()
        .map(|ip| format!("-d {ip}/{} ", family.host_prefix()))
        .unwrap_or_default();
    generator
        .define(
            Place::NAT_DOCKER,
            format!(
                "{destination}! -i {iface} -p {proto} -m {proto} --dport {host_port} -j DNAT --to-destination {}",
                endpoint.address.socket(container_port)
            ),
        )
        .family(family)
        .group(Group::Container);

    if first {
        generator
            .define(
                Place::FILTER_DOCKER,
                format!(
                    "-d {address} ! -i {iface} -o {iface} -p {proto} -m {proto} --dport {container_port} -j ACCEPT"
                ),
            )
            .family(family)
            .group(Group::Container);
    }
}

/// Port publishing rules for one container.
///
/// # Errors
///
/// Propagates interface resolution failures.
pub fn container_rules(
    container: &ContainerConfig,
    networks: &BTreeMap<String, NetworkConfig>,
    gateway_bridge: Option<&NetworkConfig>,
) -> WallResult<RuleGenerator> {
    let endpoints = resolve_endpoints(container, networks, gateway_bridge)?;
    let mut generator = RuleGenerator::new();
    let mut served = Served::new();
    for port in &container.ports {
        for endpoint in &endpoints {
            if port.accepts(endpoint.address.family()) {
                port_rules(&mut generator, &mut served, port, endpoint);
            }
        }
    }
    Ok(generator)
}
