//! Container network topology
//!
//! Typed records for the container/network enumeration consumed from the
//! runtime, plus the reduction operations the compiler needs: the
//! deduplicated set of custom networks and the set of host ports actually
//! published to the wildcard address.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Reserved alias for the runtime's default bridge network.
pub const DEFAULT_BRIDGE: &str = "docker0";

/// The network a container belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    /// [`DEFAULT_BRIDGE`] for the default bridge, otherwise the network name.
    pub name: String,
    /// 12-character truncated network identifier.
    pub id: String,
}

impl NetworkRef {
    /// An unresolved or empty network key falls back to the default bridge.
    pub fn is_default(&self) -> bool {
        self.name.is_empty() || self.name == DEFAULT_BRIDGE
    }

    /// Host-side bridge interface carrying this network's traffic.
    pub fn bridge(&self) -> String {
        if self.is_default() {
            DEFAULT_BRIDGE.to_string()
        } else {
            format!("br-{}", self.id)
        }
    }
}

/// A published container port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host address the binding is attached to. Only the wildcard address
    /// counts as publicly exposed.
    pub host_addr: Ipv4Addr,
    /// Host-side port; zero when the port is exposed but not published.
    pub public: u16,
    /// Container-side port.
    pub private: u16,
}

impl PortBinding {
    /// True for bindings reachable from any interface. Ports bound to a
    /// specific host address never count as public, and a zero public port
    /// marks a container port that is not published externally.
    pub fn is_public(&self) -> bool {
        self.host_addr == Ipv4Addr::UNSPECIFIED && self.public != 0
    }
}

/// One container as reported by the runtime enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// 12-character truncated container identifier.
    pub id: String,
    pub network: NetworkRef,
    pub subnet: Ipv4Network,
    pub addr: Ipv4Addr,
    pub ports: Vec<PortBinding>,
}

/// A distinct user-defined container network.
///
/// Uniqueness key is the (identifier, subnet) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: String,
    pub subnet: Ipv4Network,
}

/// Deduplicated custom networks, sorted by (identifier, subnet).
///
/// The default bridge is excluded: it is addressed through the reserved
/// alias and its fixed rule block, not through per-network records.
pub fn unique_networks(containers: &[ContainerRecord]) -> Vec<NetworkRecord> {
    let networks: BTreeSet<NetworkRecord> = containers
        .iter()
        .filter(|container| !container.network.is_default())
        .map(|container| NetworkRecord {
            id: container.network.id.clone(),
            subnet: container.subnet,
        })
        .collect();

    networks.into_iter().collect()
}

/// Distinct host ports published to the wildcard address by any container.
pub fn published_public_ports(containers: &[ContainerRecord]) -> BTreeSet<u16> {
    containers
        .iter()
        .flat_map(|container| container.ports.iter())
        .filter(|binding| binding.is_public())
        .map(|binding| binding.public)
        .collect()
}
