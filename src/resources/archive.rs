//! Reading uploaded zip packages.
//!
//! Entry paths are untrusted. Anything that could escape the package root
//! (a `..` segment with either separator, an absolute path, a drive prefix)
//! is rejected up front and never looked at again.
//!
//! Sizes declared in entry headers are untrusted as well: an entry that
//! claims or inflates to more than the remaining size budget fails the read.

use std::io::{Cursor, Read};

use zip::{ZipArchive, result::ZipError};

use crate::{
    error::{Diagnostic, DiagnosticKind, ImportError},
    resources::{mesh::MeshFormat, sdf::file_name},
};

/// Upper bound for an uploaded package and for everything it inflates to.
pub const MAX_PACKAGE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub struct ArchiveEntry {
    /// Entry path with `/` separators.
    pub path: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn has_extension(&self, extensions: &[&str]) -> bool {
        let name = self.file_name().to_ascii_lowercase();
        extensions.iter().any(|ext| name.ends_with(ext))
    }

    fn is_named(&self, name: &str) -> bool {
        self.file_name().eq_ignore_ascii_case(name)
    }
}

#[derive(Debug, Default)]
pub struct ArchiveContents {
    entries: Vec<ArchiveEntry>,
    /// One diagnostic per rejected entry.
    pub rejected: Vec<Diagnostic>,
}

impl ArchiveContents {
    pub fn read(bytes: &[u8]) -> Result<Self, ImportError> {
        Self::read_with_limit(bytes, MAX_PACKAGE_BYTES)
    }

    /// Reads the archive, failing once the inflated entries exceed `limit`
    /// bytes in total.
    pub fn read_with_limit(bytes: &[u8], limit: u64) -> Result<Self, ImportError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut contents = Self::default();
        let mut remaining = limit;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let path = file.name().replace('\\', "/");
            if file.is_dir() || path.ends_with('/') {
                continue;
            }
            if path.split('/').any(|segment| segment == "__MACOSX") {
                log::debug!("ignoring metadata entry {path}");
                continue;
            }
            if !is_safe_path(&path) {
                contents.rejected.push(Diagnostic::new(
                    DiagnosticKind::RejectedEntry,
                    file.name(),
                    "entry path escapes the package root",
                ));
                continue;
            }
            let too_large = || ImportError::TooLarge {
                name: path.clone(),
                limit,
            };
            if file.size() > remaining {
                return Err(too_large());
            }
            let mut data = Vec::new();
            file.by_ref()
                .take(remaining.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(ZipError::from)?;
            if data.len() as u64 > remaining {
                return Err(too_large());
            }
            remaining -= data.len() as u64;
            contents.entries.push(ArchiveEntry { path, bytes: data });
        }

        log::info!(
            "archive holds {} usable entries, {} rejected",
            contents.entries.len(),
            contents.rejected.len()
        );
        Ok(contents)
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    pub fn scene_description(&self) -> Option<&ArchiveEntry> {
        self.first(|entry| entry.has_extension(&[".sdf"]))
    }

    pub fn specification(&self) -> Option<&ArchiveEntry> {
        self.first(|entry| entry.is_named("specification.json"))
            .or_else(|| self.first(|entry| entry.is_named("specification")))
    }

    pub fn config(&self) -> Option<&ArchiveEntry> {
        self.first(|entry| entry.is_named("model.config"))
            .or_else(|| self.first(|entry| entry.has_extension(&[".config"])))
    }

    pub fn physics(&self) -> Option<&ArchiveEntry> {
        self.first(|entry| entry.is_named("model.yaml"))
            .or_else(|| self.first(|entry| entry.has_extension(&[".yaml", ".yml"])))
    }

    pub fn source_script(&self) -> Option<&ArchiveEntry> {
        self.first(|entry| entry.is_named("assembly.py"))
            .or_else(|| self.first(|entry| entry.has_extension(&[".py"])))
            .or_else(|| self.first(|entry| entry.has_extension(&[".scad"])))
    }

    /// All entries with a supported mesh extension, in archive order.
    pub fn meshes(&self) -> Vec<&ArchiveEntry> {
        self.entries
            .iter()
            .filter(|entry| MeshFormat::from_path(&entry.path).is_some())
            .collect()
    }

    /// Finds the entry a mesh reference points at: a segment-aligned suffix
    /// match of the whole reference first, then the bare file name.
    pub fn find_mesh(&self, reference: &str) -> Option<&ArchiveEntry> {
        let reference = reference.trim().replace('\\', "/");
        let reference = reference.trim_start_matches("./");
        if reference.is_empty() {
            return None;
        }
        let suffix = format!("/{reference}");
        self.first(|entry| entry.path == reference || entry.path.ends_with(&suffix))
            .or_else(|| {
                let name = file_name(reference);
                self.first(|entry| entry.file_name() == name)
            })
    }

    fn first(&self, predicate: impl Fn(&ArchiveEntry) -> bool) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|entry| predicate(entry))
    }
}

/// `true` when the path stays inside the package root.
pub fn is_safe_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') {
        return false;
    }
    // drive prefix such as `C:`
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return false;
    }
    !normalized.split('/').any(|segment| segment == "..")
}
