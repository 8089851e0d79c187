//! Query name → address routing
//!
//! After lowercasing and stripping the zone, the remaining components are
//! matched in this order:
//!
//! | name                 | resolves to                          |
//! |----------------------|--------------------------------------|
//! | `label`              | launcher, `print` mode               |
//! | `label.mode`         | launcher for `mode`                  |
//! | `label.mode.index`   | stager chunk `index` of `mode`       |
//! | `label.index`        | file chunk `index`                   |
//!
//! Anything else, an unknown label, or an index outside `1..=len` does not
//! resolve and the query gets no answer at all.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::stager::{Mode, StagerContext, StagerSet};

/// Kind of payload an address points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Launcher,
    FileChunk,
    StagerChunk,
}

/// Decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub label: String,
    pub kind: AddressKind,
    pub mode: Option<Mode>,
    /// 1-based chunk index
    pub index: Option<usize>,
}

/// A resolved address with the text to serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub address: Address,
    pub payload: &'a str,
    /// Number of chunks in the addressed sequence (1 for launchers)
    pub total: usize,
}

/// Read-only routing table built once at startup
#[derive(Debug)]
pub struct Router {
    zone: String,
    catalog: Catalog,
    stagers: HashMap<String, StagerSet>,
}

impl Router {
    /// Generate stagers for every catalog entry and build the table
    pub fn new(catalog: Catalog, ctx: &StagerContext) -> Self {
        let stagers = catalog
            .entries()
            .into_iter()
            .map(|entry| (entry.label.clone(), StagerSet::generate(entry, ctx)))
            .collect();

        Self {
            zone: normalize_name(&ctx.zone),
            catalog,
            stagers,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn stagers(&self, label: &str) -> Option<&StagerSet> {
        self.stagers.get(label)
    }

    /// Strip the zone from a query name
    ///
    /// Returns the lowercased components in front of the zone, or `None` if
    /// the name is not strictly below the zone.
    pub fn strip_zone(&self, qname: &str) -> Option<Vec<String>> {
        let name = normalize_name(qname);
        let host = name.strip_suffix(self.zone.as_str())?.strip_suffix('.')?;

        if host.is_empty() {
            return None;
        }

        Some(host.split('.').map(str::to_string).collect())
    }

    /// Resolve a query name to its payload
    pub fn resolve(&self, qname: &str) -> Option<Resolved<'_>> {
        let parts = self.strip_zone(qname)?;
        let label = parts.first()?;

        let entry = self.catalog.get(label)?;
        let stagers = self.stagers.get(label)?;

        let address = |kind, mode, index| Address {
            label: label.clone(),
            kind,
            mode,
            index,
        };

        match parts.as_slice() {
            // label → print launcher
            [_] => Some(Resolved {
                address: address(AddressKind::Launcher, Some(Mode::Print), None),
                payload: stagers.launcher(Mode::Print),
                total: 1,
            }),

            // label.mode → launcher
            [_, mode] if Mode::parse(mode).is_some() => {
                let mode = Mode::parse(mode)?;
                Some(Resolved {
                    address: address(AddressKind::Launcher, Some(mode), None),
                    payload: stagers.launcher(mode),
                    total: 1,
                })
            }

            // label.mode.index → stager chunk
            [_, mode, index] => {
                let mode = Mode::parse(mode)?;
                let chunks = stagers.chunks(mode);
                let index = parse_index(index)?;
                Some(Resolved {
                    address: address(AddressKind::StagerChunk, Some(mode), Some(index)),
                    payload: chunks.get(index)?,
                    total: chunks.len(),
                })
            }

            // label.index → file chunk
            [_, index] => {
                let index = parse_index(index)?;
                Some(Resolved {
                    address: address(AddressKind::FileChunk, None, Some(index)),
                    payload: entry.chunks.get(index)?,
                    total: entry.chunks.len(),
                })
            }

            _ => None,
        }
    }
}

/// Lowercase (ASCII) and drop a trailing dot
pub fn normalize_name(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Decimal index; leading zeros are allowed, zero is not a valid index
fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().filter(|&i| i > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkSize;
    use crate::stager::Target;

    fn router(size: usize) -> Router {
        let size = ChunkSize::new(size).unwrap();
        let catalog = Catalog::from_files(
            [
                ("payload.bin", &[0xde, 0xad, 0xbe, 0xef][..]),
                ("print", &b"named like a mode"[..]),
            ],
            size,
        );
        let ctx = StagerContext {
            target: Target::Powershell,
            zone: "Example.COM.".to_string(),
            nameserver: "ns1.example.com".to_string(),
            size,
        };
        Router::new(catalog, &ctx)
    }

    #[test]
    fn test_bare_label_is_print_launcher() {
        let router = router(4);
        let resolved = router.resolve("payload-bin.example.com").unwrap();

        assert_eq!(resolved.address.kind, AddressKind::Launcher);
        assert_eq!(resolved.address.mode, Some(Mode::Print));
        assert_eq!(resolved.address.index, None);
        assert_eq!(
            resolved.payload,
            router.stagers("payload-bin").unwrap().launcher(Mode::Print)
        );
    }

    #[test]
    fn test_mode_launchers() {
        let router = router(4);
        for mode in Mode::ALL {
            let name = format!("payload-bin.{}.example.com", mode);
            let resolved = router.resolve(&name).unwrap();
            assert_eq!(resolved.address.kind, AddressKind::Launcher);
            assert_eq!(resolved.address.mode, Some(mode));
        }
    }

    #[test]
    fn test_file_chunks() {
        let router = router(4);

        let first = router.resolve("payload-bin.1.example.com").unwrap();
        assert_eq!(first.address.kind, AddressKind::FileChunk);
        assert_eq!(first.address.index, Some(1));
        assert_eq!(first.payload, "3q2+");
        assert_eq!(first.total, 2);

        let second = router.resolve("payload-bin.2.example.com").unwrap();
        assert_eq!(second.payload, "7w==");
    }

    #[test]
    fn test_stager_chunks_differ_from_file_chunks() {
        let router = router(4);

        let stager = router.resolve("payload-bin.save.1.example.com").unwrap();
        assert_eq!(stager.address.kind, AddressKind::StagerChunk);
        assert_eq!(stager.address.mode, Some(Mode::Save));
        assert_eq!(stager.address.index, Some(1));

        let file = router.resolve("payload-bin.1.example.com").unwrap();
        assert_ne!(stager.payload, file.payload);

        let set = router.stagers("payload-bin").unwrap();
        let last = set.chunks(Mode::Save).len();
        assert!(router
            .resolve(&format!("payload-bin.save.{}.example.com", last))
            .is_some());
        assert!(router
            .resolve(&format!("payload-bin.save.{}.example.com", last + 1))
            .is_none());
    }

    #[test]
    fn test_out_of_range_indices() {
        let router = router(4);
        assert!(router.resolve("payload-bin.0.example.com").is_none());
        assert!(router.resolve("payload-bin.3.example.com").is_none());
        assert!(router.resolve("payload-bin.exec.0.example.com").is_none());
        assert!(router
            .resolve("payload-bin.99999999999999999999999.example.com")
            .is_none());
    }

    #[test]
    fn test_leading_zero_index() {
        let router = router(4);
        let resolved = router.resolve("payload-bin.01.example.com").unwrap();
        assert_eq!(resolved.address.index, Some(1));
    }

    #[test]
    fn test_case_and_trailing_dot() {
        let router = router(4);
        let resolved = router.resolve("PAYLOAD-BIN.2.EXAMPLE.com.").unwrap();
        assert_eq!(resolved.payload, "7w==");
    }

    #[test]
    fn test_non_matching_names() {
        let router = router(4);
        for name in [
            "unknown.example.com",
            "unknown.1.example.com",
            "example.com",
            ".example.com",
            "payload-bin.example.org",
            "payload-bin.1.other.com",
            "payload-binexample.com",
            "payload-bin.run.example.com",
            "payload-bin.run.1.example.com",
            "payload-bin.1.2.example.com",
            "payload-bin.print.1.2.example.com",
            "payload-bin.-1.example.com",
            "payload-bin.+1.example.com",
            "payload-bin..example.com",
        ] {
            assert!(router.resolve(name).is_none(), "{} should not resolve", name);
        }
    }

    #[test]
    fn test_label_named_like_mode() {
        let router = router(255);
        let launcher = router.resolve("print.example.com").unwrap();
        assert_eq!(launcher.address.label, "print");
        assert_eq!(launcher.address.kind, AddressKind::Launcher);

        let chunk = router.resolve("print.print.1.example.com").unwrap();
        assert_eq!(chunk.address.kind, AddressKind::StagerChunk);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let router = router(4);
        let a = router.resolve("payload-bin.exec.1.example.com").unwrap();
        let b = router.resolve("payload-bin.exec.1.example.com").unwrap();
        assert_eq!(a, b);
    }
}
