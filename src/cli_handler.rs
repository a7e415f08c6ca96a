//! Subcommand handling for netfence.
//!
//! Each handler builds its own tokio runtime, sized for what it does.

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{ConfigError, ConfigLoader, ResolvedConfig, validate};
use crate::dns::{DnsClient, RecordType};
use crate::proxy::RouteTls;
use crate::service::{ReloadRequest, Service};
use crate::telemetry::AuditLogger;

/// Dispatch the parsed command line.
pub fn handle_command(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Serve { .. } => run_serve(cli).map(|()| ExitCode::SUCCESS),
        Commands::Check => run_check(cli).map(|()| ExitCode::SUCCESS),
        Commands::Query {
            name,
            qtype,
            server,
            tcp,
            timeout_ms,
        } => run_query(cli, name, qtype, *server, *tcp, *timeout_ms),
        Commands::ResolvConf => {
            let config = load_config(cli).context("Failed to load configuration")?;
            print!("{}", config.isolation.resolv_conf());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load every config layer, apply CLI overrides and validate.
pub fn load_config(cli: &Cli) -> Result<ResolvedConfig, ConfigError> {
    let mut config = ConfigLoader::new().load(cli.config.as_deref())?;
    config.merge(cli.overrides());
    debug!("Merged configuration: {:?}", config);
    validate(&config)
}

fn run_serve(cli: &Cli) -> Result<()> {
    let config = load_config(cli).context("Failed to load configuration")?;
    let audit = Arc::new(AuditLogger::open(&config.audit).context("Failed to open audit log")?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let service = Service::bind(config, audit, None, shutdown_rx)
            .await
            .context("Failed to start service")?;

        spawn_shutdown_listener(shutdown_tx)?;
        spawn_reload_listener(cli, service.reload_sender())?;

        service.run().await.context("Service failed")
    })
}

/// Flip the shutdown channel on SIGINT or SIGTERM.
fn spawn_shutdown_listener(shutdown_tx: watch::Sender<bool>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(true);
    });
    Ok(())
}

/// Re-read configuration on every SIGHUP and hand it to the service.
fn spawn_reload_listener(
    cli: &Cli,
    reload_tx: tokio::sync::mpsc::Sender<ReloadRequest>,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    let config_path = cli.config.clone();
    let overrides = cli.overrides();

    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            info!("Received SIGHUP, reloading configuration");
            let config_path = config_path.clone();
            let overrides = overrides.clone();

            // Validation resolves upstream host names.
            let loaded = tokio::task::spawn_blocking(move || {
                let mut config = ConfigLoader::new().load(config_path.as_deref())?;
                config.merge(overrides);
                validate(&config)
            })
            .await;

            let request = match loaded {
                Ok(request) => request,
                Err(e) => {
                    error!("Reload task failed: {}", e);
                    continue;
                }
            };
            if reload_tx.try_send(request).is_err() {
                warn!("Reload dropped: service busy or stopped");
            }
        }
    });
    Ok(())
}

fn run_check(cli: &Cli) -> Result<()> {
    let config = load_config(cli).context("Configuration is invalid")?;

    println!(
        "Configuration OK ({} isolation)",
        config.isolation.mode()
    );
    println!(
        "Resolver: {} (health {})",
        config.resolver_listen, config.health_listen
    );

    println!("\nAllowlist ({} domains):", config.allowlist.len());
    for entry in config.allowlist.entries() {
        let tag = entry.service_tag.as_deref().unwrap_or("-");
        println!("  {:<40} {:<20} {}", entry.domain, entry.proxy_address, tag);
    }

    println!("\nRoutes ({}):", config.routes.len());
    for route in config.routes.iter() {
        println!(
            "  {:<16} {} -> {} [{}] ({}) idle {}s",
            route.service_name,
            route.listen_address,
            route.upstream_address,
            route.upstream_host,
            route.tls.policy(),
            route.idle_timeout.as_secs()
        );
        if let RouteTls::TerminateCheckSni { expected_hostnames } = &route.tls {
            let names: Vec<&str> = expected_hostnames.iter().map(String::as_str).collect();
            println!("  {:<16} SNI: {}", "", names.join(", "));
        }
    }

    Ok(())
}

fn run_query(
    cli: &Cli,
    name: &str,
    qtype: &str,
    server: Option<std::net::SocketAddr>,
    tcp: bool,
    timeout_ms: u64,
) -> Result<ExitCode> {
    let qtype = RecordType::from_mnemonic(qtype)
        .with_context(|| format!("Unknown record type '{}'", qtype))?;
    let server = match server {
        Some(server) => server,
        None => {
            load_config(cli)
                .context("No --server given and configuration could not be loaded")?
                .resolver_listen
        }
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let client = DnsClient::new(server, Duration::from_millis(timeout_ms));
    let result = rt.block_on(async {
        if tcp {
            client.query_tcp(name, qtype).await
        } else {
            client.query(name, qtype).await
        }
    });

    match result {
        Ok(outcome) => {
            println!(
                "{} {} @{}: {} ({} answers)",
                name, qtype, server, outcome.rcode, outcome.answer_count
            );
            for (addr, ttl) in outcome.addresses.iter().zip(&outcome.ttls) {
                println!("  {}\tttl={}", addr, ttl);
            }
            if outcome.addresses.is_empty() {
                Ok(ExitCode::from(1))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) if e.is_transport() => {
            println!("{} {} @{}: unreachable ({})", name, qtype, server, e);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e).context("Malformed response"),
    }
}
