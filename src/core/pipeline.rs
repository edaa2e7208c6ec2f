//! The compilation pipeline
//!
//! One synchronous pass per run: read the grant sources, enumerate
//! topology, reconcile, compile, persist, apply. There is no shared
//! mutable state and no suspension point; a run either completes or stops
//! at the first fatal condition.

use tracing::{debug, info};

use crate::audit;
use crate::config::EngineConfig;
use crate::core::apply;
use crate::core::error::Result;
use crate::core::reconcile::reconcile;
use crate::core::runtime::ContainerRuntime;
use crate::core::ruleset::{self, CompiledRuleset, PolicyModel};
use crate::core::sources::{self, Resolve};
use crate::core::topology;

/// Timestamp format used in the generated-ruleset header.
const HEADER_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Drives one compilation run against injected collaborators.
pub struct Engine<'a> {
    config: &'a EngineConfig,
    resolver: &'a dyn Resolve,
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a EngineConfig,
        resolver: &'a dyn Resolve,
        runtime: &'a dyn ContainerRuntime,
    ) -> Self {
        Self {
            config,
            resolver,
            runtime,
        }
    }

    /// Builds the policy model from the grant sources and live topology.
    ///
    /// # Errors
    ///
    /// Fails fast with [`crate::Error::AdminSetEmpty`] when no admin entry
    /// resolves, and with [`crate::Error::Runtime`] when the runtime is
    /// present but cannot be enumerated.
    pub fn build_model(&self) -> Result<PolicyModel> {
        let admins = sources::load_admin_set(&self.config.admin_file, self.resolver)?;
        info!(admins = admins.len(), "admin allowlist resolved");

        let runtime_present = self.runtime.is_available();
        let containers = if runtime_present {
            self.runtime.containers()?
        } else {
            debug!("container runtime not present, skipping topology");
            Vec::new()
        };

        let entities = sources::load_entity_grants(&self.config.entity_file, self.resolver);
        let address_grants =
            sources::load_address_grants(&self.config.address_file, self.resolver);
        let public_ports = sources::load_public_ports(&self.config.public_ports_file);

        let reconciled = reconcile(&address_grants, &public_ports);
        let networks = topology::unique_networks(&containers);
        let published = topology::published_public_ports(&containers);
        info!(
            containers = containers.len(),
            networks = networks.len(),
            published_ports = published.len(),
            "topology reduced"
        );

        Ok(PolicyModel {
            generated_at: chrono::Utc::now().format(HEADER_TIME_FORMAT).to_string(),
            restore_banner: apply::restore_version(&self.config.iptables_binary)
                .unwrap_or_default(),
            admins,
            entities,
            public_ports,
            reconciled,
            containers,
            networks,
            runtime_present,
        })
    }

    /// Runs the pipeline up to rendering, without persisting or applying.
    pub fn compile(&self) -> Result<CompiledRuleset> {
        let model = self.build_model()?;
        ruleset::compile(&model)
    }

    /// Full run: compile, persist to the configured path, apply. Returns
    /// the restore mechanism's captured output.
    pub fn run(&self) -> Result<String> {
        let compiled = self.compile()?;
        compiled.persist(&self.config.ruleset_file)?;
        audit::log_compile(compiled.line_count(), compiled.checksum());

        let outcome = apply::apply(&self.config.restore_script, &self.config.ruleset_file);
        audit::log_apply(
            outcome.is_ok(),
            outcome.as_ref().err().map(ToString::to_string),
        );
        outcome
    }
}
