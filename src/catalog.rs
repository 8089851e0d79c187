//! File catalog
//!
//! Scans the top level of the served directory once at startup. Every
//! readable regular file becomes a [`CatalogEntry`] keyed by its sanitized
//! label. The catalog is never modified afterwards.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chunk::{ChunkSize, Chunks};
use crate::sanitize::sanitize_os;
use crate::CourierError;

/// One servable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Unique sanitized label, first component of every query name
    pub label: String,
    /// Filename as found on disk (lossy UTF-8)
    pub original_name: String,
    /// Base64 chunks of the file content
    pub chunks: Chunks,
}

/// A file that was left out of the catalog
#[derive(Debug)]
pub enum Skipped {
    /// Metadata or content could not be read
    Unreadable { path: PathBuf, error: std::io::Error },
    /// The name sanitizes to an empty label
    EmptyLabel { path: PathBuf },
    /// Zero-length file; there is nothing to chunk
    Empty { path: PathBuf },
}

/// Informational events produced while scanning
#[derive(Debug, Default)]
pub struct ScanReport {
    pub skipped: Vec<Skipped>,
    /// `(original name, label it wanted, label it got)`
    pub renamed: Vec<(String, String, String)>,
}

/// Immutable label → entry table
#[derive(Debug, Default)]
pub struct Catalog {
    entries: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// Scan `dir` (non-recursive) and chunk every readable regular file
    ///
    /// Files are visited in byte-wise name order. When two names sanitize to
    /// the same label the first keeps it and later ones get the first free
    /// `-2`, `-3`, ... suffix. Anything that is not a regular file after
    /// following symlinks (directories, FIFOs, sockets, devices) is skipped.
    ///
    /// # Errors
    ///
    /// Fails only if `dir` itself cannot be listed. Unreadable files are
    /// reported in the [`ScanReport`] and left out.
    pub fn scan(dir: &Path, size: ChunkSize) -> Result<(Self, ScanReport), CourierError> {
        if !dir.is_dir() {
            return Err(CourierError::InvalidPath(dir.to_path_buf()));
        }

        let mut report = ScanReport::default();
        let entries = fs::read_dir(dir)?.map(|entry| entry.map(|entry| entry.file_name()));
        let names = collect_names(dir, entries, &mut report);

        let mut catalog = Self {
            entries: HashMap::with_capacity(names.len()),
        };

        for name in names {
            let path = dir.join(&name);

            // Follows symlinks, like opening the file would
            match fs::metadata(&path) {
                Ok(meta) if !meta.is_file() => continue,
                Ok(meta) if meta.len() == 0 => {
                    report.skipped.push(Skipped::Empty { path });
                    continue;
                }
                Ok(_) => {}
                Err(error) => {
                    report.skipped.push(Skipped::Unreadable { path, error });
                    continue;
                }
            }

            let wanted = sanitize_os(&name);
            if wanted.is_empty() {
                report.skipped.push(Skipped::EmptyLabel { path });
                continue;
            }

            let content = match fs::read(&path) {
                Ok(content) if content.is_empty() => {
                    report.skipped.push(Skipped::Empty { path });
                    continue;
                }
                Ok(content) => content,
                Err(error) => {
                    report.skipped.push(Skipped::Unreadable { path, error });
                    continue;
                }
            };

            let original_name = name.to_string_lossy().into_owned();
            let label = catalog.free_label(&wanted);
            if label != wanted {
                report
                    .renamed
                    .push((original_name.clone(), wanted, label.clone()));
            }

            catalog.insert(CatalogEntry {
                label,
                original_name,
                chunks: Chunks::encode(&content, size),
            });
        }

        Ok((catalog, report))
    }

    /// Build a catalog from in-memory files, applying the same naming rules
    pub fn from_files<'a, I>(files: I, size: ChunkSize) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut files: Vec<_> = files.into_iter().collect();
        files.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut catalog = Self {
            entries: HashMap::with_capacity(files.len()),
        };

        for (name, content) in files {
            let wanted = crate::sanitize::sanitize(name);
            if wanted.is_empty() || content.is_empty() {
                continue;
            }
            let label = catalog.free_label(&wanted);
            catalog.insert(CatalogEntry {
                label,
                original_name: name.to_string(),
                chunks: Chunks::encode(content, size),
            });
        }

        catalog
    }

    fn free_label(&self, wanted: &str) -> String {
        if !self.entries.contains_key(wanted) {
            return wanted.to_string();
        }

        (2usize..)
            .map(|n| format!("{}-{}", wanted, n))
            .find(|candidate| !self.entries.contains_key(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }

    fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.label.clone(), entry);
    }

    /// Get entry by label
    pub fn get(&self, label: &str) -> Option<&CatalogEntry> {
        self.entries.get(label)
    }

    /// Entries sorted by label
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Directory listing errors are reported against `dir`; names come back sorted by bytes
fn collect_names<I>(dir: &Path, entries: I, report: &mut ScanReport) -> Vec<OsString>
where
    I: IntoIterator<Item = std::io::Result<OsString>>,
{
    let mut names = Vec::new();
    for entry in entries {
        match entry {
            Ok(name) => names.push(name),
            Err(error) => report.skipped.push(Skipped::Unreadable {
                path: dir.to_path_buf(),
                error,
            }),
        }
    }

    names.sort_by(|a, b| a.as_encoded_bytes().cmp(b.as_encoded_bytes()));
    names
}
