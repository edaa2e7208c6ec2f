//! rampart - iptables policy compiler for container hosts
//!
//! CLI surface and wiring of the production collaborators (system
//! resolver, docker CLI) into the compilation engine.
//!
//! # Usage
//!
//! ```bash
//! rampart compile                 # Print the compiled ruleset
//! rampart compile -o out.rules    # Write it to a file instead
//! rampart apply                   # Compile, persist, and apply
//! rampart --config cfg.json apply # Override the default layout
//! ```

use clap::{Parser, Subcommand};
use shadow_rs::shadow;
use std::path::PathBuf;
use std::process::ExitCode;

use rampart::config;
use rampart::core::pipeline::Engine;
use rampart::core::runtime::DockerCli;
use rampart::core::sources::SystemResolver;

shadow!(build);

#[derive(Parser)]
#[command(name = "rampart")]
#[command(about = "Compile and apply host firewall policy for container hosts", long_about = None)]
#[command(version = build::PKG_VERSION, long_version = build::CLAP_LONG_VERSION)]
struct Cli {
    /// Path to a JSON config file overriding the default layout
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the ruleset and print it without applying
    Compile {
        /// Write the ruleset to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Compile, persist, and apply the ruleset to the kernel
    Apply,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> rampart::Result<()> {
    let config = config::load(cli.config.as_deref())?;
    config::ensure_layout(&config)?;

    let resolver = SystemResolver;
    let runtime = DockerCli;
    let engine = Engine::new(&config, &resolver, &runtime);

    match cli.command {
        Commands::Compile { output } => {
            let compiled = engine.compile()?;
            match output {
                Some(path) => compiled.persist(&path)?,
                None => print!("{}", compiled.text()),
            }
        }
        Commands::Apply => {
            let outcome = engine.run()?;
            if !outcome.is_empty() {
                print!("{outcome}");
            }
        }
    }
    Ok(())
}
