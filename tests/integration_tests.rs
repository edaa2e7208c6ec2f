//! Integration tests for rampart
//!
//! These tests drive the engine end to end against a temporary directory
//! and a mock restore script, so they never require privileges and never
//! touch the kernel's packet filter. Grant sources use literal addresses
//! only, so the system resolver is never asked to do real DNS.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use rampart::config::EngineConfig;
use rampart::core::pipeline::Engine;
use rampart::core::runtime::ContainerRuntime;
use rampart::core::sources::SystemResolver;
use rampart::core::topology::{ContainerRecord, NetworkRef, PortBinding};
use rampart::Error;

/// Get the path to a mock restore script shipped next to the tests
fn mock_script(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push(name);
    path
}

/// Runtime returning a fixed container list (integration tests cannot see
/// the crate-internal test helpers, so this file carries its own copy).
struct FixedRuntime {
    available: bool,
    records: Vec<ContainerRecord>,
}

impl ContainerRuntime for FixedRuntime {
    fn is_available(&self) -> bool {
        self.available
    }

    fn containers(&self) -> rampart::Result<Vec<ContainerRecord>> {
        Ok(self.records.clone())
    }
}

fn no_runtime() -> FixedRuntime {
    FixedRuntime {
        available: false,
        records: Vec::new(),
    }
}

fn web_container() -> ContainerRecord {
    ContainerRecord {
        id: "0123456789ab".to_string(),
        network: NetworkRef {
            name: "docker0".to_string(),
            id: "abcdef123456".to_string(),
        },
        subnet: "172.17.0.0/16".parse().unwrap(),
        addr: "172.17.0.2".parse().unwrap(),
        ports: vec![PortBinding {
            host_addr: Ipv4Addr::UNSPECIFIED,
            public: 8080,
            private: 80,
        }],
    }
}

fn write_sources(base: &Path, admin: &str, entity: &str, ips: &str, public: &str) {
    std::fs::write(base.join("admin.txt"), admin).unwrap();
    std::fs::write(base.join("entity.txt"), entity).unwrap();
    std::fs::write(base.join("ips.txt"), ips).unwrap();
    std::fs::write(base.join("public.txt"), public).unwrap();
}

fn test_config(base: &Path, script: &str) -> EngineConfig {
    EngineConfig {
        admin_file: base.join("admin.txt"),
        entity_file: base.join("entity.txt"),
        address_file: base.join("ips.txt"),
        public_ports_file: base.join("public.txt"),
        ruleset_file: base.join("compiled.rules"),
        restore_script: mock_script(script),
        iptables_binary: base.join("no-such-iptables"),
    }
}

#[test]
fn full_run_compiles_persists_and_applies() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    write_sources(base, "10.0.0.5\n", "", "10.0.0.9:80,443\n", "80,90\n");

    let config = test_config(base, "mock_restore.sh");
    let resolver = SystemResolver;
    let runtime = no_runtime();
    let engine = Engine::new(&config, &resolver, &runtime);

    let outcome = engine.run().unwrap();
    assert!(outcome.contains("mock restore: rules loaded"));

    let persisted = std::fs::read_to_string(&config.ruleset_file).unwrap();
    assert!(persisted.starts_with("# Generated by rampart"));
    assert!(persisted.contains(":INPUT DROP [0:0]"));
    assert!(persisted.contains("-A INPUT -s 10.0.0.5 -p tcp -m state --state NEW -m tcp -j ACCEPT"));
    assert!(persisted.contains("--dports 80,90 -j ACCEPT"));
    // Port 80 is public, so only the 443 grant survives for 10.0.0.9.
    assert!(persisted.contains("-A INPUT -s 10.0.0.9 -p tcp -m state --state NEW -m tcp --dport 443 -j ACCEPT"));
    assert!(!persisted.contains("--dport 80 "));
    assert!(persisted.ends_with("COMMIT\n"));
}

#[test]
fn failed_restore_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    write_sources(base, "10.0.0.5\n", "", "", "");

    let config = test_config(base, "mock_restore_fail.sh");
    let resolver = SystemResolver;
    let runtime = no_runtime();
    let engine = Engine::new(&config, &resolver, &runtime);

    let err = engine.run().unwrap_err();
    match err {
        Error::Restore {
            stderr, exit_code, ..
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(stderr.unwrap().contains("refusing to load"));
        }
        other => panic!("expected restore error, got: {other}"),
    }

    // The ruleset was still persisted; only the apply step failed.
    assert!(config.ruleset_file.exists());
}

#[test]
fn empty_admin_source_aborts_before_writing_anything() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    write_sources(base, "", "", "10.0.0.9:80\n", "80\n");

    let config = test_config(base, "mock_restore.sh");
    let resolver = SystemResolver;
    let runtime = no_runtime();
    let engine = Engine::new(&config, &resolver, &runtime);

    assert!(matches!(engine.run(), Err(Error::AdminSetEmpty)));
    assert!(!config.ruleset_file.exists());
}

#[test]
fn container_topology_lands_in_filter_and_nat_tables() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    write_sources(base, "10.0.0.5\n", "", "", "");

    let config = test_config(base, "mock_restore.sh");
    let resolver = SystemResolver;
    let runtime = FixedRuntime {
        available: true,
        records: vec![web_container()],
    };
    let engine = Engine::new(&config, &resolver, &runtime);

    let compiled = engine.compile().unwrap();
    let text = compiled.text();

    assert!(text.contains(":DOCKER - [0:0]"));
    assert!(text.contains(
        "-A DOCKER -s 10.0.0.5 -d 172.17.0.2/32 ! -i docker0 -o docker0 -p tcp -m tcp --dport 80 -j ACCEPT"
    ));
    assert!(text.contains("*nat"));
    assert!(text.contains(
        "-A DOCKER ! -i docker0 -p tcp -m tcp --dport 8080 -j DNAT --to-destination 172.17.0.2:80"
    ));
}

#[test]
fn compile_only_never_invokes_the_restore_script() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    write_sources(base, "10.0.0.5\n", "", "", "");

    // A restore script that would blow up if ever executed.
    let mut config = test_config(base, "mock_restore_fail.sh");
    config.ruleset_file = base.join("compiled.rules");

    let resolver = SystemResolver;
    let runtime = no_runtime();
    let engine = Engine::new(&config, &resolver, &runtime);

    let compiled = engine.compile().unwrap();
    assert!(compiled.text().contains(":INPUT DROP [0:0]"));
    assert!(!config.ruleset_file.exists());
}
