//! Container runtime enumeration
//!
//! The engine consumes topology through the [`ContainerRuntime`] seam so
//! tests can inject fixed records. The production implementation shells out
//! to the `docker` CLI and reduces its inspect payloads to the fields the
//! compiler needs.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::process::Command;

use ipnetwork::Ipv4Network;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::topology::{ContainerRecord, NetworkRef, PortBinding, DEFAULT_BRIDGE};
use crate::utils::binary_on_path;

/// Container/network enumeration seam.
pub trait ContainerRuntime {
    /// True when the runtime is installed on this host. When false, the
    /// compiler omits every runtime-specific chain and the NAT table.
    fn is_available(&self) -> bool;

    /// Enumerates running containers with their network membership and
    /// published ports, pre-filtered to wildcard-bound bindings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when the runtime cannot be queried. This
    /// is a whole-source failure: stale topology must abort the run rather
    /// than compile a ruleset that no longer matches reality.
    fn containers(&self) -> Result<Vec<ContainerRecord>>;
}

/// Runtime enumeration via the `docker` command-line client.
pub struct DockerCli;

/// Runtime identifiers are referenced in 12-character truncated form.
const ID_WIDTH: usize = 12;

fn truncate_id(id: &str) -> String {
    id.chars().take(ID_WIDTH).collect()
}

// Subset of `docker inspect <container>` the compiler cares about.
#[derive(Debug, Deserialize)]
struct InspectContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "NetworkSettings")]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, InspectEndpoint>,
    #[serde(rename = "Ports", default)]
    ports: BTreeMap<String, Option<Vec<InspectBinding>>>,
}

#[derive(Debug, Deserialize)]
struct InspectEndpoint {
    #[serde(rename = "NetworkID", default)]
    network_id: String,
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct InspectBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

// Subset of `docker network inspect <network>`.
#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAM")]
    ipam: InspectIpam,
}

#[derive(Debug, Deserialize)]
struct InspectIpam {
    #[serde(rename = "Config", default)]
    config: Vec<InspectIpamConfig>,
}

#[derive(Debug, Deserialize)]
struct InspectIpamConfig {
    #[serde(rename = "Subnet", default)]
    subnet: String,
}

fn run_docker(args: &[&str]) -> Result<String> {
    let output = Command::new("docker").args(args).output().map_err(|err| {
        Error::Runtime(format!("failed to run docker {}: {err}", args.join(" ")))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Runtime(format!(
            "docker {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl DockerCli {
    fn network_subnet(
        &self,
        network_id: &str,
        cache: &mut BTreeMap<String, Option<Ipv4Network>>,
    ) -> Result<Option<Ipv4Network>> {
        if let Some(subnet) = cache.get(network_id) {
            return Ok(*subnet);
        }

        let raw = run_docker(&["network", "inspect", network_id])?;
        let networks: Vec<InspectNetwork> = serde_json::from_str(&raw)?;

        let subnet = networks
            .first()
            .and_then(|network| {
                network
                    .ipam
                    .config
                    .iter()
                    .find_map(|config| config.subnet.parse::<Ipv4Network>().ok())
            });

        cache.insert(network_id.to_string(), subnet);
        Ok(subnet)
    }
}

impl ContainerRuntime for DockerCli {
    fn is_available(&self) -> bool {
        binary_on_path("docker")
    }

    fn containers(&self) -> Result<Vec<ContainerRecord>> {
        let id_list = run_docker(&["ps", "-q"])?;
        let ids: Vec<&str> = id_list.split_whitespace().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect"];
        args.extend(&ids);
        let raw = run_docker(&args)?;
        let inspected: Vec<InspectContainer> = serde_json::from_str(&raw)?;

        let mut subnet_cache = BTreeMap::new();
        let mut records = Vec::new();

        for inspect in inspected {
            let container_id = truncate_id(&inspect.id);

            // A container is attached to exactly one network for policy
            // purposes; take the first by name when the runtime reports
            // several.
            let Some((net_name, endpoint)) = inspect.network_settings.networks.iter().next()
            else {
                debug!(container = %container_id, "container has no network, skipping");
                continue;
            };

            let Ok(addr) = endpoint.ip_address.parse::<Ipv4Addr>() else {
                debug!(container = %container_id, "container has no IPv4 address, skipping");
                continue;
            };

            let Some(subnet) = self.network_subnet(&endpoint.network_id, &mut subnet_cache)?
            else {
                debug!(container = %container_id, "network has no IPv4 subnet, skipping");
                continue;
            };

            let name = if net_name == "bridge" {
                DEFAULT_BRIDGE.to_string()
            } else {
                net_name.clone()
            };
            let network = NetworkRef {
                name,
                id: truncate_id(&endpoint.network_id),
            };

            let ports = collect_bindings(&inspect.network_settings.ports);

            records.push(ContainerRecord {
                id: container_id,
                network,
                subnet,
                addr,
                ports,
            });
        }

        Ok(records)
    }
}

/// Flattens the inspect port map into wildcard-bound TCP bindings.
fn collect_bindings(
    ports: &BTreeMap<String, Option<Vec<InspectBinding>>>,
) -> Vec<PortBinding> {
    let mut bindings = Vec::new();

    for (spec, host_bindings) in ports {
        let Some((port, proto)) = spec.split_once('/') else {
            continue;
        };
        if proto != "tcp" {
            continue;
        }
        let Ok(private) = port.parse::<u16>() else {
            continue;
        };
        let Some(host_bindings) = host_bindings else {
            // Exposed but not published.
            continue;
        };

        for host in host_bindings {
            let Ok(host_addr) = host.host_ip.parse::<Ipv4Addr>() else {
                continue;
            };
            if host_addr != Ipv4Addr::UNSPECIFIED {
                continue;
            }
            let Ok(public) = host.host_port.parse::<u16>() else {
                continue;
            };
            bindings.push(PortBinding {
                host_addr,
                public,
                private,
            });
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings_from(json: &str) -> Vec<PortBinding> {
        let ports: BTreeMap<String, Option<Vec<InspectBinding>>> =
            serde_json::from_str(json).unwrap();
        collect_bindings(&ports)
    }

    #[test]
    fn wildcard_tcp_bindings_survive() {
        let bindings = bindings_from(
            r#"{"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}]}"#,
        );

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].public, 8080);
        assert_eq!(bindings[0].private, 80);
        assert!(bindings[0].is_public());
    }

    #[test]
    fn interface_bound_and_v6_bindings_dropped() {
        let bindings = bindings_from(
            r#"{"80/tcp": [
                {"HostIp": "127.0.0.1", "HostPort": "8080"},
                {"HostIp": "::", "HostPort": "8080"}
            ]}"#,
        );

        assert!(bindings.is_empty());
    }

    #[test]
    fn unpublished_and_udp_ports_dropped() {
        let bindings = bindings_from(
            r#"{"90/tcp": null, "53/udp": [{"HostIp": "0.0.0.0", "HostPort": "53"}]}"#,
        );

        assert!(bindings.is_empty());
    }

    #[test]
    fn inspect_payload_parses() {
        let raw = r#"[{
            "Id": "0123456789abcdef0123456789abcdef",
            "NetworkSettings": {
                "Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}]},
                "Networks": {"bridge": {"NetworkID": "fedcba9876543210fedcba9876543210", "IPAddress": "172.17.0.2"}}
            }
        }]"#;

        let inspected: Vec<InspectContainer> = serde_json::from_str(raw).unwrap();
        assert_eq!(truncate_id(&inspected[0].id), "0123456789ab");

        let (name, endpoint) = inspected[0]
            .network_settings
            .networks
            .iter()
            .next()
            .unwrap();
        assert_eq!(name, "bridge");
        assert_eq!(truncate_id(&endpoint.network_id), "fedcba987654");
    }
}
