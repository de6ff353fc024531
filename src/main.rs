mod config;
mod emitter;
mod enforcer;
mod error;
mod logger;
mod parser;
mod profile;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logger::TracingLogger;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use types::SecurityPolicy;

#[derive(Parser)]
#[command(name = "confine")]
#[command(about = "Compiles declarative container security policy into AppArmor profiles and enforces them")]
struct Cli {
    /// Path to a confine.toml overriding the apparmor directory, proc root, and parser binary.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the AppArmor directory, removing managed profiles no running process still uses.
    Bootstrap,
    /// Register a profile for use, creating its skeleton if absent and bumping its refcount.
    Register {
        name: String,
        /// Reset to skeleton without touching the refcount, instead of a full registration.
        #[arg(long)]
        init: bool,
    },
    /// Release a reference to a profile, or reset it when --init is given.
    Unregister {
        name: String,
        #[arg(long)]
        init: bool,
    },
    /// Render a profile from a JSON policy list without touching disk or the kernel.
    Compile { policies: PathBuf, profile_name: String },
    /// Regenerate, write, and reload a profile from a JSON policy list.
    Update { policies: PathBuf, profile_name: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<config::Config> {
    match path {
        Some(p) => config::load(p),
        None => Ok(config::Config::default()),
    }
}

fn load_policies(path: &PathBuf) -> Result<Vec<SecurityPolicy>> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing policies from {}", path.display()))
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Bootstrap => {
            let en = enforcer::Enforcer::new(cfg, Box::new(TracingLogger)).map_err(|e| anyhow::anyhow!(e))?;
            en.bootstrap().map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        }
        Commands::Register { name, init } => {
            let en = enforcer::Enforcer::new(cfg, Box::new(TracingLogger)).map_err(|e| anyhow::anyhow!(e))?;
            en.bootstrap().map_err(|e| anyhow::anyhow!(e))?;
            if !en.register(&name, !init) {
                anyhow::bail!("failed to register {}", name);
            }
            Ok(())
        }
        Commands::Unregister { name, init } => {
            let en = enforcer::Enforcer::new(cfg, Box::new(TracingLogger)).map_err(|e| anyhow::anyhow!(e))?;
            en.bootstrap().map_err(|e| anyhow::anyhow!(e))?;
            if !en.unregister(&name, !init) {
                anyhow::bail!("failed to unregister {}", name);
            }
            Ok(())
        }
        Commands::Compile { policies, profile_name } => {
            let policies = load_policies(&policies)?;
            let en = enforcer::Enforcer::new(cfg, Box::new(TracingLogger)).map_err(|e| anyhow::anyhow!(e))?;
            let result = en.generate(&profile_name, &policies).map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", result.text);
            println!("# {} rule(s)", result.count);
            Ok(())
        }
        Commands::Update { policies, profile_name } => {
            let policies = load_policies(&policies)?;
            let en = enforcer::Enforcer::new(cfg, Box::new(TracingLogger)).map_err(|e| anyhow::anyhow!(e))?;
            en.bootstrap().map_err(|e| anyhow::anyhow!(e))?;
            let group = types::ContainerGroup {
                namespace_name: String::new(),
                container_group_name: String::new(),
                containers: vec![profile_name.clone()],
                apparmor_profiles: vec![profile_name.clone()],
                policy_enabled: types::PolicyEnabled::Enabled,
            };
            en.update_profile(&group, &profile_name, &policies);
            Ok(())
        }
    }
}
