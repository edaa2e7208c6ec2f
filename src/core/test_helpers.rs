//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::core::ruleset::PolicyModel;
use crate::core::runtime::ContainerRuntime;
use crate::core::sources::{AddressGrants, AdminSet, EntityGrant, PublicPorts, Resolve};
use crate::core::topology::{ContainerRecord, NetworkRef, PortBinding, DEFAULT_BRIDGE};
use crate::core::error::Result;

/// Resolver with a fixed lookup table. Hosts not in the table fail to
/// resolve, so tests cover the skip paths without touching real DNS.
#[derive(Debug, Default)]
pub struct FakeResolver {
    table: BTreeMap<String, Ipv4Addr>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, addr: Ipv4Addr) -> Self {
        self.table.insert(host.to_string(), addr);
        self
    }
}

impl Resolve for FakeResolver {
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        self.table.get(host).copied()
    }
}

/// Runtime returning a fixed container list.
pub struct FakeRuntime {
    pub available: bool,
    pub records: Vec<ContainerRecord>,
}

impl FakeRuntime {
    pub fn absent() -> Self {
        Self {
            available: false,
            records: Vec::new(),
        }
    }

    pub fn with(records: Vec<ContainerRecord>) -> Self {
        Self {
            available: true,
            records,
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn is_available(&self) -> bool {
        self.available
    }

    fn containers(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.records.clone())
    }
}

/// Wildcard-bound port binding.
pub fn binding(public: u16, private: u16) -> PortBinding {
    PortBinding {
        host_addr: Ipv4Addr::UNSPECIFIED,
        public,
        private,
    }
}

/// Port binding attached to a specific host address.
pub fn bound_binding(host_addr: &str, public: u16, private: u16) -> PortBinding {
    PortBinding {
        host_addr: host_addr.parse().unwrap(),
        public,
        private,
    }
}

/// Container record with the given network membership and bindings.
pub fn container(
    id: &str,
    net_name: &str,
    net_id: &str,
    subnet: &str,
    addr: &str,
    ports: Vec<PortBinding>,
) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        network: NetworkRef {
            name: net_name.to_string(),
            id: net_id.to_string(),
        },
        subnet: subnet.parse().unwrap(),
        addr: addr.parse().unwrap(),
        ports,
    }
}

/// Container on the default bridge network.
pub fn bridge_container(id: &str, addr: &str, ports: Vec<PortBinding>) -> ContainerRecord {
    container(id, DEFAULT_BRIDGE, "abcdef123456", "172.17.0.0/16", addr, ports)
}

/// Minimal valid model: one admin, no grants, no topology. Tests extend
/// the returned value with whatever the case under test needs.
pub fn base_model() -> PolicyModel {
    PolicyModel {
        generated_at: "Thu Jan  1 00:00:00 2026".to_string(),
        restore_banner: String::new(),
        admins: [Ipv4Addr::new(10, 0, 0, 5)].into_iter().collect::<AdminSet>(),
        entities: Vec::new(),
        public_ports: PublicPorts::default(),
        reconciled: AddressGrants::new(),
        containers: Vec::new(),
        networks: Vec::new(),
        runtime_present: false,
    }
}

/// Entity grant record for compiler tests.
pub fn entity(name: &str, addr: &str, ports: &[u16]) -> EntityGrant {
    EntityGrant {
        name: name.to_string(),
        addr: addr.parse().unwrap(),
        ports: ports.iter().copied().collect(),
    }
}
