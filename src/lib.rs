//! txtcourier: file and payload delivery over DNS TXT records
//!
//! Every file in a directory is base64-encoded, split into chunks and served
//! as TXT answers under a zone the server pretends to be authoritative for.
//! Alongside the raw chunks, generated stagers (PowerShell or bash) let a
//! client with nothing but outbound DNS pull a file and print, execute or
//! save it.
//!
//! ## Addressing
//!
//! ```text
//! <label>.<zone>                  print launcher
//! <label>.<mode>.<zone>           launcher for mode (print, exec, save)
//! <label>.<mode>.<i>.<zone>       stager chunk i
//! <label>.<i>.<zone>              file chunk i
//! ```
//!
//! `<label>` is the filename sanitized to `[a-z0-9-]`; chunk indices start
//! at 1.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txtcourier::{Catalog, ChunkSize, DeliveryServer, Router, StagerContext, Target};
//!
//! # fn example() -> Result<(), txtcourier::CourierError> {
//! let size = ChunkSize::new(255)?;
//! let (catalog, _report) = Catalog::scan("/srv/files".as_ref(), size)?;
//!
//! let ctx = StagerContext {
//!     target: Target::Powershell,
//!     zone: "files.example.com".into(),
//!     nameserver: "ns1.example.com".into(),
//!     size,
//! };
//! let router = Arc::new(Router::new(catalog, &ctx));
//! let server = DeliveryServer::new(router, "ns1.example.com");
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod dns;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod pktinfo;
pub mod router;
pub mod sanitize;
pub mod server;
pub mod stager;
pub mod transport;

// Re-export core types
pub use catalog::{Catalog, CatalogEntry, ScanReport, Skipped};
pub use chunk::{ChunkSize, Chunks};
pub use config::{ConfigSource, ServerConfig};
pub use router::{Address, AddressKind, Resolved, Router};
pub use sanitize::sanitize;
pub use server::{shutdown_signal, DeliveryServer};
pub use stager::{lookup_hints, Mode, StagerContext, StagerSet, StagerVariant, Target};
pub use transport::{Envelope, InboundQuery, Transport, UdpTransport};

use std::path::PathBuf;

/// txtcourier error types
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Chunk size is not a decimal integer in 1..=255
    #[error("Incorrect size value for base64 chunks: {0:?} (expected 1-255)")]
    InvalidChunkSize(String),

    /// Serve path missing or not a directory
    #[error("Path {} does not exist or is not a directory", .0.display())]
    InvalidPath(PathBuf),

    /// Unknown stager target
    #[error("Unknown target {0} (expected powershell or bash)")]
    UnsupportedTarget(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// DNS encoding error
    #[error("DNS error: {0}")]
    Dns(#[from] dns::DnsError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
