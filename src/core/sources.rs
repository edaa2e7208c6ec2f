//! Grant-source normalization
//!
//! Parses the line-oriented access-control sources into typed records:
//! the admin allowlist, per-entity port grants, per-address port grants,
//! and the public-port list.
//!
//! The parsing policy is deliberately permissive: a malformed line, an
//! unresolvable name, or an out-of-range port drops that entry and nothing
//! else. The host stays protected by the default-deny INPUT policy, so a
//! dropped entry narrows access instead of widening it. The one exception
//! is the admin source: a run that resolves zero admin entries must abort
//! before anything is compiled (see [`Error::AdminSetEmpty`]).

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::validators::parse_port_list;

/// Name resolution seam.
///
/// The production implementation consults the platform resolver; tests
/// inject a fixed table so no run ever touches real DNS.
pub trait Resolve {
    /// Returns the first IPv4 address `host` resolves to, or `None` when
    /// resolution fails. Callers handle literal addresses themselves.
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Resolver backed by the operating system.
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        use std::net::ToSocketAddrs;

        (host, 0u16)
            .to_socket_addrs()
            .ok()?
            .find_map(|sock| match sock.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
    }
}

/// Resolves a token that is either a literal IPv4 address or a hostname.
fn resolve_host(resolver: &dyn Resolve, token: &str) -> Option<Ipv4Addr> {
    if let Ok(addr) = token.parse::<Ipv4Addr>() {
        return Some(addr);
    }
    resolver.resolve_ipv4(token)
}

/// Addresses granted unconditional access to every port.
///
/// Rebuilt in full on every compilation run; sorted so the rendered
/// source-match clause is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSet {
    addrs: BTreeSet<Ipv4Addr>,
}

impl AdminSet {
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.addrs.contains(&addr)
    }

    /// Comma-joined, sorted allowlist used as a single source-match clause.
    pub fn as_match_clause(&self) -> String {
        let addrs: Vec<String> = self.addrs.iter().map(ToString::to_string).collect();
        addrs.join(",")
    }
}

impl FromIterator<Ipv4Addr> for AdminSet {
    fn from_iter<I: IntoIterator<Item = Ipv4Addr>>(iter: I) -> Self {
        Self {
            addrs: iter.into_iter().collect(),
        }
    }
}

/// A named source granted access to an explicit port set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGrant {
    pub name: String,
    pub addr: Ipv4Addr,
    pub ports: BTreeSet<u16>,
}

/// Address-keyed port grants. Ordered so iteration, and therefore rule
/// emission, is deterministic.
pub type AddressGrants = BTreeMap<Ipv4Addr, BTreeSet<u16>>;

/// Ports open to all sources regardless of origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPorts {
    ports: BTreeSet<u16>,
}

impl PublicPorts {
    /// Parses the comma-separated public-port source. Non-numeric and
    /// out-of-range tokens are dropped.
    pub fn parse(raw: &str) -> Self {
        Self {
            ports: parse_port_list(raw),
        }
    }

    /// False when no well-formed token survived parsing; the compiler then
    /// omits the public-port rule entirely.
    pub fn is_present(&self) -> bool {
        !self.ports.is_empty()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Sorted comma-joined list for a multiport match clause.
    pub fn as_match_clause(&self) -> String {
        let ports: Vec<String> = self.ports.iter().map(ToString::to_string).collect();
        ports.join(",")
    }
}

/// Parses the admin source: one address-or-name per line.
pub fn parse_admin_set(text: &str, resolver: &dyn Resolve) -> AdminSet {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let addr = resolve_host(resolver, line);
            if addr.is_none() {
                debug!(host = line, "admin entry did not resolve, skipping");
            }
            addr
        })
        .collect()
}

/// Reads and parses the admin source.
///
/// # Errors
///
/// Returns [`Error::AdminSetEmpty`] when the file is missing, unreadable,
/// or yields zero resolved addresses. All of these would strand the
/// operator behind a default-deny ruleset, so the run must not proceed.
pub fn load_admin_set(path: &Path, resolver: &dyn Resolve) -> Result<AdminSet> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        debug!(path = %path.display(), %err, "admin source unreadable");
        Error::AdminSetEmpty
    })?;

    let admins = parse_admin_set(&text, resolver);
    if admins.is_empty() {
        return Err(Error::AdminSetEmpty);
    }
    Ok(admins)
}

/// Parses `name:port,port,...` entity lines.
///
/// Lines without a port list, with zero valid ports, or with an
/// unresolvable name are skipped. A later line resolving to an address
/// already claimed keeps the first record (first-wins).
pub fn parse_entity_grants(text: &str, resolver: &dyn Resolve) -> Vec<EntityGrant> {
    let mut grants: Vec<EntityGrant> = Vec::new();

    for line in text.lines() {
        let Some((name, ports_raw)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let ports = parse_port_list(ports_raw);
        if ports.is_empty() {
            debug!(entity = name, "entity grant has no valid port, skipping");
            continue;
        }
        let Some(addr) = resolve_host(resolver, name) else {
            debug!(entity = name, "entity name did not resolve, skipping");
            continue;
        };
        if grants.iter().any(|grant| grant.addr == addr) {
            debug!(entity = name, %addr, "address already granted, keeping first entry");
            continue;
        }
        grants.push(EntityGrant {
            name: name.to_string(),
            addr,
            ports,
        });
    }

    grants
}

/// Parses `address:port,port,...` lines.
///
/// Unlike entity grants, repeated lines for the same address merge
/// additively: a later line extends the port set instead of replacing it.
pub fn parse_address_grants(text: &str, resolver: &dyn Resolve) -> AddressGrants {
    let mut grants = AddressGrants::new();

    for line in text.lines() {
        let Some((host, ports_raw)) = line.split_once(':') else {
            continue;
        };
        let Some(addr) = resolve_host(resolver, host.trim()) else {
            debug!(host = host.trim(), "address grant did not resolve, skipping");
            continue;
        };
        let ports = parse_port_list(ports_raw);
        if ports.is_empty() {
            continue;
        }
        grants.entry(addr).or_default().extend(ports);
    }

    grants
}

/// Reads the entity source. A missing file is an optional-source skip.
pub fn load_entity_grants(path: &Path, resolver: &dyn Resolve) -> Vec<EntityGrant> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_entity_grants(&text, resolver),
        Err(err) => {
            debug!(path = %path.display(), %err, "entity source unavailable");
            Vec::new()
        }
    }
}

/// Reads the address-grant source. A missing file is an optional-source skip.
pub fn load_address_grants(path: &Path, resolver: &dyn Resolve) -> AddressGrants {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_address_grants(&text, resolver),
        Err(err) => {
            debug!(path = %path.display(), %err, "address source unavailable");
            AddressGrants::new()
        }
    }
}

/// Reads the public-port source. A missing file means no public ports.
pub fn load_public_ports(path: &Path) -> PublicPorts {
    match std::fs::read_to_string(path) {
        Ok(text) => PublicPorts::parse(&text),
        Err(err) => {
            debug!(path = %path.display(), %err, "public-port source unavailable");
            PublicPorts::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::FakeResolver;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn admin_set_resolves_literals_and_names() {
        let resolver = FakeResolver::new().with("ops.example.com", ip("203.0.113.7"));
        let admins = parse_admin_set("10.0.0.5\nops.example.com\n", &resolver);

        assert_eq!(admins.len(), 2);
        assert_eq!(admins.as_match_clause(), "10.0.0.5,203.0.113.7");
    }

    #[test]
    fn admin_set_skips_unresolvable_lines() {
        let resolver = FakeResolver::new();
        let admins = parse_admin_set("nosuch.invalid\n10.0.0.5\n", &resolver);

        assert_eq!(admins.len(), 1);
        assert!(admins.contains(ip("10.0.0.5")));
    }

    #[test]
    fn admin_set_deduplicates() {
        let resolver = FakeResolver::new().with("ops.example.com", ip("10.0.0.5"));
        let admins = parse_admin_set("10.0.0.5\nops.example.com\n", &resolver);

        assert_eq!(admins.len(), 1);
        assert_eq!(admins.as_match_clause(), "10.0.0.5");
    }

    #[test]
    fn admin_match_clause_is_sorted() {
        let resolver = FakeResolver::new();
        let admins = parse_admin_set("10.0.0.9\n10.0.0.2\n10.0.0.5\n", &resolver);

        assert_eq!(admins.as_match_clause(), "10.0.0.2,10.0.0.5,10.0.0.9");
    }

    #[test]
    fn ipv6_literals_are_skipped() {
        let resolver = FakeResolver::new();
        let admins = parse_admin_set("2001:db8::1\n10.0.0.5\n", &resolver);

        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn entity_grants_first_wins_on_duplicate_address() {
        let resolver = FakeResolver::new()
            .with("a.example.com", ip("198.51.100.4"))
            .with("b.example.com", ip("198.51.100.4"));
        let grants =
            parse_entity_grants("a.example.com:443\nb.example.com:80\n", &resolver);

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].name, "a.example.com");
        assert_eq!(grants[0].ports.iter().copied().collect::<Vec<_>>(), vec![443]);
    }

    #[test]
    fn entity_grants_skip_invalid_lines() {
        let resolver = FakeResolver::new().with("ok.example.com", ip("198.51.100.9"));
        let grants = parse_entity_grants(
            "noports\nbad.example.com:443\nempty.example.com:\nok.example.com:22,abc\n",
            &resolver,
        );

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].addr, ip("198.51.100.9"));
        assert_eq!(grants[0].ports.iter().copied().collect::<Vec<_>>(), vec![22]);
    }

    #[test]
    fn address_grants_merge_additively() {
        let resolver = FakeResolver::new();
        let grants =
            parse_address_grants("10.0.0.9:80,443\n10.0.0.9:8080\n", &resolver);

        let ports = &grants[&ip("10.0.0.9")];
        assert_eq!(ports.iter().copied().collect::<Vec<_>>(), vec![80, 443, 8080]);
    }

    #[test]
    fn address_grants_all_invalid_ports_leave_no_entry() {
        let resolver = FakeResolver::new();
        let grants = parse_address_grants("10.0.0.9:abc,70000\n", &resolver);

        assert!(grants.is_empty());
    }

    #[test]
    fn public_ports_presence_flag() {
        assert!(PublicPorts::parse("80,90").is_present());
        assert!(!PublicPorts::parse("").is_present());
        assert!(!PublicPorts::parse("abc,,").is_present());
    }

    #[test]
    fn public_ports_match_clause() {
        let ports = PublicPorts::parse("90,80,90\n");
        assert_eq!(ports.as_match_clause(), "80,90");
    }
}
