//! Ruleset compilation
//!
//! Renders the reconciled policy model into iptables-restore text. Rule
//! order is the security contract here: the filter table evaluates top to
//! bottom, so the sections must come out in a fixed sequence — default
//! policies, connection-tracking and loopback accepts, the admin allowlist,
//! public ports, entity grants, per-address grants, baseline egress, and
//! finally the container forwarding, ingress, isolation, and NAT blocks.
//!
//! Rendering is a pure function of the model. All collections in the model
//! are ordered, so identical models always produce byte-identical output
//! and an unchanged policy never causes a spurious reapply.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use ipnetwork::Ipv4Network;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::sources::{AddressGrants, AdminSet, EntityGrant, PublicPorts};
use crate::core::topology::{ContainerRecord, NetworkRecord, DEFAULT_BRIDGE};

/// Subnet the runtime assigns to the default bridge network.
const DEFAULT_BRIDGE_SUBNET: &str = "172.17.0.0/16";

/// Default verdict a filter chain applies when no rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ChainPolicy {
    #[strum(serialize = "ACCEPT")]
    Accept,
    #[strum(serialize = "DROP")]
    Drop,
}

/// Everything the compiler needs for one run.
///
/// `generated_at` and `restore_banner` are part of the model rather than
/// sampled during rendering, keeping [`compile`] deterministic.
#[derive(Debug, Clone)]
pub struct PolicyModel {
    pub generated_at: String,
    /// Captured `iptables -V` banner; empty when probing failed.
    pub restore_banner: String,
    pub admins: AdminSet,
    pub entities: Vec<EntityGrant>,
    pub public_ports: PublicPorts,
    pub reconciled: AddressGrants,
    pub containers: Vec<ContainerRecord>,
    pub networks: Vec<NetworkRecord>,
    pub runtime_present: bool,
}

/// An immutable compiled ruleset.
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    text: String,
    checksum: String,
}

impl CompiledRuleset {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// SHA-256 of the rendered text, recorded in the audit trail.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// Writes the ruleset to `path` atomically: the full text lands in a
    /// temporary file in the same directory, which is then renamed over the
    /// target. A partially written ruleset must never be visible to the
    /// restore step.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let dir = path.parent().ok_or_else(|| {
            Error::Render(format!("ruleset path {} has no parent directory", path.display()))
        })?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(self.text.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| Error::Io(err.error))?;

        debug!(path = %path.display(), "ruleset persisted");
        Ok(())
    }
}

/// Compiles the model into restore-ready text.
///
/// # Errors
///
/// Returns [`Error::AdminSetEmpty`] when the model carries no admin
/// address, and [`Error::Render`] when the model is structurally malformed
/// (conflicting network records, unidentifiable containers). Nothing is
/// persisted on failure.
pub fn compile(model: &PolicyModel) -> Result<CompiledRuleset> {
    validate(model)?;

    let mut out = String::new();
    write_header(&mut out, model);
    write_filter_table(&mut out, model);
    if model.runtime_present {
        write_nat_table(&mut out, model);
    }

    let mut hasher = Sha256::new();
    hasher.update(out.as_bytes());
    let checksum = format!("{:x}", hasher.finalize());

    Ok(CompiledRuleset { text: out, checksum })
}

fn validate(model: &PolicyModel) -> Result<()> {
    if model.admins.is_empty() {
        return Err(Error::AdminSetEmpty);
    }

    let mut subnets: BTreeMap<&str, Ipv4Network> = BTreeMap::new();
    for network in &model.networks {
        if network.id.is_empty() {
            return Err(Error::Render("network record with empty identifier".to_string()));
        }
        if let Some(known) = subnets.insert(&network.id, network.subnet) {
            if known != network.subnet {
                return Err(Error::Render(format!(
                    "network {} appears with conflicting subnets {known} and {}",
                    network.id, network.subnet
                )));
            }
        }
    }

    for container in &model.containers {
        if container.id.is_empty() {
            return Err(Error::Render("container record with empty identifier".to_string()));
        }
        if !container.network.is_default() && container.network.id.is_empty() {
            return Err(Error::Render(format!(
                "container {} references a network without an identifier",
                container.id
            )));
        }
    }

    Ok(())
}

fn join_ports(ports: &BTreeSet<u16>) -> String {
    let ports: Vec<String> = ports.iter().map(ToString::to_string).collect();
    ports.join(",")
}

fn write_header(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(
        out,
        "# Generated by rampart {} on {}",
        env!("CARGO_PKG_VERSION"),
        model.generated_at
    );
    if !model.restore_banner.is_empty() {
        let _ = writeln!(out, "# {}", model.restore_banner);
    }
}

fn write_filter_table(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(out, "*filter");

    // Deny-by-default only holds together with a populated admin
    // allowlist; without one the INPUT policy falls back to accept so a
    // bad compilation cannot strand the operator.
    let input_policy = if model.admins.is_empty() {
        ChainPolicy::Accept
    } else {
        ChainPolicy::Drop
    };
    let _ = writeln!(out, ":INPUT {input_policy} [0:0]");
    let _ = writeln!(out, ":FORWARD {} [0:0]", ChainPolicy::Drop);
    let _ = writeln!(out, ":OUTPUT {} [0:0]", ChainPolicy::Drop);
    if model.runtime_present {
        let _ = writeln!(out, ":DOCKER - [0:0]");
        let _ = writeln!(out, ":DOCKER-ISOLATION-STAGE-1 - [0:0]");
        let _ = writeln!(out, ":DOCKER-ISOLATION-STAGE-2 - [0:0]");
        let _ = writeln!(out, ":DOCKER-USER - [0:0]");
    }
    let _ = writeln!(out);

    write_input_rules(out, model);
    write_output_rules(out);

    if model.runtime_present {
        write_forward_rules(out, model);
        write_container_ingress(out, model);
        write_isolation_rules(out, model);
    }

    let _ = writeln!(out, "COMMIT");
}

fn write_input_rules(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(out, "-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT");
    let _ = writeln!(out, "# localhost");
    let _ = writeln!(out, "-A INPUT -i lo -j ACCEPT");
    let _ = writeln!(out);

    let _ = writeln!(out, "# admin allowlist");
    let _ = writeln!(
        out,
        "-A INPUT -s {} -p tcp -m state --state NEW -m tcp -j ACCEPT",
        model.admins.as_match_clause()
    );

    if model.public_ports.is_present() {
        let _ = writeln!(out, "# public ports");
        let _ = writeln!(
            out,
            "-A INPUT -m state --state NEW -p tcp -m tcp -m multiport --dports {} -j ACCEPT",
            model.public_ports.as_match_clause()
        );
    }

    if !model.entities.is_empty() {
        let _ = writeln!(out, "# entity grants");
        for entity in &model.entities {
            let _ = writeln!(
                out,
                "-A INPUT -s {} -p tcp -m state --state NEW -m multiport --dports {} -j ACCEPT",
                entity.addr,
                join_ports(&entity.ports)
            );
        }
    }

    if model.reconciled.values().any(|ports| !ports.is_empty()) {
        let _ = writeln!(out, "# per-address grants");
        for (addr, ports) in &model.reconciled {
            for port in ports {
                let _ = writeln!(
                    out,
                    "-A INPUT -s {addr} -p tcp -m state --state NEW -m tcp --dport {port} -j ACCEPT"
                );
            }
        }
    }
    let _ = writeln!(out);
}

fn write_output_rules(out: &mut String) {
    let _ = writeln!(out, "-A OUTPUT -m state --state NEW,RELATED,ESTABLISHED -j ACCEPT");
    let _ = writeln!(out, "-A OUTPUT -o lo -j ACCEPT");
    let _ = writeln!(out);
}

fn write_forward_rules(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(out, "-A FORWARD -j DOCKER-USER");
    let _ = writeln!(out, "-A FORWARD -j DOCKER-ISOLATION-STAGE-1");
    let _ = writeln!(
        out,
        "-A FORWARD -o {DEFAULT_BRIDGE} -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"
    );
    let _ = writeln!(out, "-A FORWARD -o {DEFAULT_BRIDGE} -j DOCKER");
    let _ = writeln!(out, "-A FORWARD -i {DEFAULT_BRIDGE} ! -o {DEFAULT_BRIDGE} -j ACCEPT");
    let _ = writeln!(out, "-A FORWARD -i {DEFAULT_BRIDGE} -o {DEFAULT_BRIDGE} -j ACCEPT");

    for network in &model.networks {
        let bridge = format!("br-{}", network.id);
        let _ = writeln!(
            out,
            "-A FORWARD -o {bridge} -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"
        );
        let _ = writeln!(out, "-A FORWARD -o {bridge} -j DOCKER");
        let _ = writeln!(out, "-A FORWARD -i {bridge} ! -o {bridge} -j ACCEPT");
        let _ = writeln!(out, "-A FORWARD -i {bridge} -o {bridge} -j ACCEPT");
    }
    let _ = writeln!(out);
}

/// One ingress rule into the runtime's filtering chain.
fn write_ingress_rule(out: &mut String, source: &str, container: &ContainerRecord, dport: u16) {
    let bridge = container.network.bridge();
    let _ = writeln!(
        out,
        "-A DOCKER -s {source} -d {}/32 ! -i {bridge} -o {bridge} -p tcp -m tcp --dport {dport} -j ACCEPT",
        container.addr
    );
}

fn write_container_ingress(out: &mut String, model: &PolicyModel) {
    if model.containers.is_empty() {
        return;
    }
    let admin_clause = model.admins.as_match_clause();

    // Three tiers with identical structure, scoped progressively tighter:
    // all admins, then entities whose grant covers the published port, then
    // individual addresses whose reconciled grant covers it.
    let _ = writeln!(out, "# admin access to containers");
    for container in &model.containers {
        for binding in container.ports.iter().filter(|b| b.is_public()) {
            write_ingress_rule(out, &admin_clause, container, binding.private);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "# entity access to containers");
    for container in &model.containers {
        for binding in container.ports.iter().filter(|b| b.is_public()) {
            for entity in &model.entities {
                if entity.ports.contains(&binding.public) {
                    write_ingress_rule(out, &entity.addr.to_string(), container, binding.private);
                }
            }
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "# per-address access to containers");
    for container in &model.containers {
        for binding in container.ports.iter().filter(|b| b.is_public()) {
            for (addr, ports) in &model.reconciled {
                if ports.contains(&binding.public) {
                    write_ingress_rule(out, &addr.to_string(), container, binding.private);
                }
            }
        }
    }
    let _ = writeln!(out);
}

fn write_isolation_rules(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(
        out,
        "-A DOCKER-ISOLATION-STAGE-1 -i {DEFAULT_BRIDGE} ! -o {DEFAULT_BRIDGE} -j DOCKER-ISOLATION-STAGE-2"
    );
    for network in &model.networks {
        let bridge = format!("br-{}", network.id);
        let _ = writeln!(
            out,
            "-A DOCKER-ISOLATION-STAGE-1 -i {bridge} ! -o {bridge} -j DOCKER-ISOLATION-STAGE-2"
        );
    }
    let _ = writeln!(out, "-A DOCKER-ISOLATION-STAGE-1 -j RETURN");

    let _ = writeln!(out, "-A DOCKER-ISOLATION-STAGE-2 -o {DEFAULT_BRIDGE} -j DROP");
    for network in &model.networks {
        let _ = writeln!(out, "-A DOCKER-ISOLATION-STAGE-2 -o br-{} -j DROP", network.id);
    }
    let _ = writeln!(out, "-A DOCKER-ISOLATION-STAGE-2 -j RETURN");
    let _ = writeln!(out, "-A DOCKER-USER -j RETURN");
}

fn write_nat_table(out: &mut String, model: &PolicyModel) {
    let _ = writeln!(out, "*nat");
    let _ = writeln!(out, ":PREROUTING {} [0:0]", ChainPolicy::Accept);
    let _ = writeln!(out, ":INPUT {} [0:0]", ChainPolicy::Accept);
    let _ = writeln!(out, ":OUTPUT {} [0:0]", ChainPolicy::Accept);
    let _ = writeln!(out, ":POSTROUTING {} [0:0]", ChainPolicy::Accept);
    let _ = writeln!(out, ":DOCKER - [0:0]");
    let _ = writeln!(out, "-A PREROUTING -m addrtype --dst-type LOCAL -j DOCKER");
    let _ = writeln!(out, "-A OUTPUT ! -d 127.0.0.0/8 -m addrtype --dst-type LOCAL -j DOCKER");
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "-A POSTROUTING -s {DEFAULT_BRIDGE_SUBNET} ! -o {DEFAULT_BRIDGE} -j MASQUERADE"
    );
    for network in &model.networks {
        let _ = writeln!(
            out,
            "-A POSTROUTING -s {} ! -o br-{} -j MASQUERADE",
            network.subnet, network.id
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "-A DOCKER -i {DEFAULT_BRIDGE} -j RETURN");
    for network in &model.networks {
        let _ = writeln!(out, "-A DOCKER -i br-{} -j RETURN", network.id);
    }
    let _ = writeln!(out);

    for container in &model.containers {
        let bridge = container.network.bridge();
        for binding in container.ports.iter().filter(|b| b.is_public()) {
            let _ = writeln!(
                out,
                "-A DOCKER ! -i {bridge} -p tcp -m tcp --dport {} -j DNAT --to-destination {}:{}",
                binding.public, container.addr, binding.private
            );
        }
    }
    let _ = writeln!(out, "COMMIT");
}
