//! Server configuration
//!
//! Values come from an optional TOML file and the command line; command-line
//! values win. [`ConfigSource`] holds the raw, possibly partial values and
//! [`ServerConfig`] the validated result.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::chunk::{ChunkSize, DEFAULT_CHUNK_SIZE};
use crate::router::normalize_name;
use crate::stager::{StagerContext, Target};
use crate::CourierError;

/// Default DNS port
pub const DEFAULT_PORT: u16 = 53;

/// Raw configuration values, from a TOML file or the command line
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigSource {
    /// Network interface to listen on
    pub interface: Option<String>,

    /// Zone the server answers for
    pub domain: Option<String>,

    /// Nameserver FQDN for the authority section
    pub nameserver: Option<String>,

    /// Directory to serve
    pub path: Option<PathBuf>,

    /// Chunk size as given; validated later so bad input is reported
    #[serde(deserialize_with = "deserialize_size")]
    pub size: Option<String>,

    /// Client runtime for stagers
    pub target: Option<String>,

    /// UDP port to listen on
    pub port: Option<u16>,

    /// Per-query debug logging
    pub verbose: Option<bool>,
}

/// `size = 200` and `size = "200"` are both accepted in TOML
fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Int(i64),
        Text(String),
    }

    Ok(Option::<RawSize>::deserialize(deserializer)?.map(|raw| match raw {
        RawSize::Int(n) => n.to_string(),
        RawSize::Text(s) => s,
    }))
}

impl ConfigSource {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Fill every unset field from `fallback`
    pub fn or(self, fallback: ConfigSource) -> ConfigSource {
        ConfigSource {
            interface: self.interface.or(fallback.interface),
            domain: self.domain.or(fallback.domain),
            nameserver: self.nameserver.or(fallback.nameserver),
            path: self.path.or(fallback.path),
            size: self.size.or(fallback.size),
            target: self.target.or(fallback.target),
            port: self.port.or(fallback.port),
            verbose: self.verbose.or(fallback.verbose),
        }
    }
}

/// Validated configuration, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub interface: String,
    /// Lowercase, no trailing dot
    pub domain: String,
    /// Lowercase, no trailing dot
    pub nameserver: String,
    /// Absolute path of the served directory
    pub path: PathBuf,
    pub size: ChunkSize,
    pub target: Target,
    pub port: u16,
    pub verbose: bool,
}

impl ServerConfig {
    /// Validate raw values
    ///
    /// # Errors
    ///
    /// - missing interface, domain or nameserver
    /// - chunk size that is not a decimal integer in `1..=255`
    /// - serve path that does not exist or is not a directory
    /// - unknown target
    pub fn from_source(source: ConfigSource) -> Result<Self, CourierError> {
        let interface = required(source.interface, "interface")?;
        let domain = normalize_name(&required(source.domain, "domain")?);
        let nameserver = normalize_name(&required(source.nameserver, "nameserver")?);

        if domain.is_empty() {
            return Err(CourierError::InvalidConfig("domain must not be empty".into()));
        }
        if nameserver.is_empty() {
            return Err(CourierError::InvalidConfig(
                "nameserver must not be empty".into(),
            ));
        }
        if domain.split('.').any(|label| label.is_empty() || label.len() > 63) {
            return Err(CourierError::InvalidConfig(format!(
                "domain {} is not a valid DNS name",
                domain
            )));
        }
        if nameserver.split('.').any(|label| label.is_empty() || label.len() > 63) {
            return Err(CourierError::InvalidConfig(format!(
                "nameserver {} is not a valid DNS name",
                nameserver
            )));
        }

        let size = match source.size {
            Some(raw) => raw.parse::<ChunkSize>()?,
            None => ChunkSize::new(DEFAULT_CHUNK_SIZE)?,
        };

        let target = match source.target {
            Some(raw) => raw.parse::<Target>()?,
            None => Target::default(),
        };

        let path = source.path.unwrap_or_else(|| PathBuf::from("."));
        let path = match std::fs::canonicalize(&path) {
            Ok(canonical) if canonical.is_dir() => canonical,
            _ => return Err(CourierError::InvalidPath(path)),
        };

        Ok(Self {
            interface,
            domain,
            nameserver,
            path,
            size,
            target,
            port: source.port.unwrap_or(DEFAULT_PORT),
            verbose: source.verbose.unwrap_or(false),
        })
    }

    /// Settings for stager generation
    pub fn stager_context(&self) -> StagerContext {
        StagerContext {
            target: self.target,
            zone: self.domain.clone(),
            nameserver: self.nameserver.clone(),
            size: self.size,
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, CourierError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CourierError::InvalidConfig(format!("{} is required", name)))
}
