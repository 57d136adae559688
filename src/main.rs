use clap::{Parser, Subcommand};
use ripster::capture::{interface_mac, AfPacketSocket};
use ripster::config::{self, Config};
use ripster::dataplane::Router;
use ripster::runtime::{spawn_interface, spawn_timers, Outboxes};
use ripster::telemetry::{init_logging, MetricsRegistry};
use ripster::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "ripster")]
#[command(about = "Userspace IPv4 router with ARP, ICMP and RIPv2")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router daemon
    Run {
        /// Path to the router configuration
        #[arg(short, long, default_value = "router.toml")]
        config: PathBuf,
    },
    /// Check a configuration file without starting the router
    Validate {
        #[arg(short, long, default_value = "router.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Validate { config } => cmd_validate(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn load_checked(path: &Path) -> Result<Config> {
    let cfg = config::load(path)?;
    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err(Error::Validation(validation.errors));
    }
    Ok(cfg)
}

fn cmd_validate(path: &Path) -> Result<()> {
    println!("[INFO] Validating {}...", path.display());
    load_checked(path)?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn build_router(cfg: &Config) -> Result<Router> {
    let metrics = Arc::new(MetricsRegistry::new());
    let mut router = Router::new(metrics, cfg.router_settings());

    for (name, iface) in &cfg.interfaces {
        let (ip_addr, mask) = iface.addressing()?;
        let mac_addr = match iface.mac_addr()? {
            Some(mac) => mac,
            None => interface_mac(name)?,
        };
        router.add_interface(name, mac_addr, ip_addr, mask);
        info!("{} configured: {} {}/{}", name, mac_addr, ip_addr, mask);
    }

    for route in &cfg.routes {
        router.add_route(route.to_route()?)?;
    }
    for entry in &cfg.arp {
        router.add_static_arp(entry.ip, entry.mac_addr()?);
        debug!("static ARP {} -> {}", entry.ip, entry.mac);
    }

    Ok(router)
}

fn cmd_run(path: &Path) -> Result<()> {
    let cfg = load_checked(path)?;
    init_logging(Some(&cfg.logging));
    info!("Loaded {}", path.display());

    let router = Arc::new(build_router(&cfg)?);
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let mut outboxes = Outboxes::new();
        let mut interfaces = Vec::new();
        for name in router.interface_names() {
            info!("Binding to interface {}...", name);
            let socket = AfPacketSocket::bind(&name).map_err(|e| {
                Error::Config(format!(
                    "failed to bind to {name}: {e}. Run with root privileges."
                ))
            })?;
            debug!("{} bound, ifindex {}", name, socket.ifindex());
            let outbox = outboxes.channel(&name);
            interfaces.push((name, Arc::new(socket), outbox));
        }

        let outboxes = Arc::new(outboxes);
        for (name, socket, outbox) in interfaces {
            spawn_interface(
                Arc::clone(&router),
                name,
                socket,
                outbox,
                Arc::clone(&outboxes),
            );
        }
        spawn_timers(Arc::clone(&router), outboxes);

        info!("Router started on {} interface(s)", router.interface_names().len());
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        for (name, value) in router.metrics().export() {
            info!("{} = {}", name, value);
        }
        Ok::<(), Error>(())
    })
}
