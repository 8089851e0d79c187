//! txtcourier - file and payload delivery over DNS TXT records

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use txtcourier::sanitize::fits_dns_limits;
use txtcourier::{
    lookup_hints, shutdown_signal, Catalog, ConfigSource, DeliveryServer, Router, ScanReport,
    ServerConfig, Skipped, UdpTransport,
};

#[derive(Parser)]
#[command(name = "txtcourier")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ", built ", env!("BUILD_DATE"), ")"))]
#[command(about = "Easy files and payloads delivery over DNS via TXT records", long_about = None)]
struct Cli {
    /// Interface to listen to DNS traffic on
    interface: Option<String>,

    /// FQDN of the DNS zone
    domain: Option<String>,

    /// FQDN of the server running txtcourier
    nameserver: Option<String>,

    /// Path of directory to serve over DNS (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    path: Option<PathBuf>,

    /// Size in bytes of base64 chunks (default: 255)
    #[arg(short, long)]
    size: Option<String>,

    /// Target language for stagers: powershell or bash (default: powershell)
    #[arg(short, long)]
    target: Option<String>,

    /// UDP port to listen on (default: 53)
    #[arg(long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_source(self) -> (ConfigSource, Option<PathBuf>) {
        let source = ConfigSource {
            interface: self.interface,
            domain: self.domain,
            nameserver: self.nameserver,
            path: self.path,
            size: self.size,
            target: self.target,
            port: self.port,
            verbose: self.verbose.then_some(true),
        };
        (source, self.config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let (cli_source, config_path) = Cli::parse().into_source();

    let source = match config_path {
        Some(path) => {
            let file = ConfigSource::from_file(&path)
                .with_context(|| format!("Failed to load config {:?}", path))?;
            cli_source.or(file)
        }
        None => cli_source,
    };

    // Initialize logger
    let level = if source.verbose.unwrap_or(false) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config = ServerConfig::from_source(source)?;
    if let Ok(effective) = toml::to_string(&config) {
        debug!("Effective configuration:\n{}", effective);
    }

    ensure_privileges(config.port)?;

    info!("txtcourier - easy files and payloads delivery over DNS via TXT records");

    let (catalog, report) =
        Catalog::scan(&config.path, config.size).context("Failed to scan serve directory")?;
    log_scan_report(&report);

    let ctx = config.stager_context();
    let router = Arc::new(Router::new(catalog, &ctx));

    for entry in router.catalog().entries() {
        info!(
            "File \"{}\" ready for delivery at {}.{} ({} chunks)",
            entry.original_name,
            entry.label,
            config.domain,
            entry.chunks.len()
        );

        if !fits_dns_limits(&entry.label, &config.domain) {
            warn!(
                "Label {} is too long to be queried under {}, rename the file",
                entry.label, config.domain
            );
        }

        for (mode, tool, command) in lookup_hints(&entry.label, &ctx) {
            info!("Lookup {} ({}): {}", mode.as_str().to_uppercase(), tool, command);
        }
    }

    if router.catalog().is_empty() {
        warn!("No files to deliver in {}", config.path.display());
    }

    let transport = UdpTransport::bind(&config.interface, config.port)
        .with_context(|| format!("Failed to listen on {}", config.interface))?;

    let server = DeliveryServer::new(router, &config.nameserver);
    info!("Listening for DNS queries...");
    server.serve(&transport, shutdown_signal()).await
}

fn log_scan_report(report: &ScanReport) {
    for skipped in &report.skipped {
        match skipped {
            Skipped::Unreadable { path, error } => warn!(
                "Error computing base64 for {}, file will be ignored: {}",
                path.display(),
                error
            ),
            Skipped::EmptyLabel { path } => warn!(
                "Name of {} has no DNS-safe characters, file will be ignored",
                path.display()
            ),
            Skipped::Empty { path } => {
                warn!("{} is empty, file will be ignored", path.display())
            }
        }
    }

    for (name, wanted, got) in &report.renamed {
        warn!(
            "\"{}\" collides with another file on label {}, serving it as {}",
            name, wanted, got
        );
    }
}

/// Ports below 1024 need root
#[cfg(unix)]
fn ensure_privileges(port: u16) -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 && port < 1024 {
        anyhow::bail!(
            "txtcourier needs to be run with root privileges to listen for incoming udp/{} packets",
            port
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_privileges(_port: u16) -> Result<()> {
    Ok(())
}
