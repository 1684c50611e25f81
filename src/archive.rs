// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory zip extraction for STIG and CCI bundles.
//!
//! DISA ships STIG libraries as zips of zips, so nested archives are
//! opened recursively up to [`MAX_NESTING`] levels.

use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};

use crate::{Result, StigqterError};

/// Deepest level of zip-inside-zip that is followed
pub const MAX_NESTING: usize = 4;

/// Most bytes reserved up front for one entry. The size in the zip header
/// is not trusted beyond this; larger entries grow while being read.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared).unwrap_or(usize::MAX).min(MAX_PREALLOC)
}

/// A file pulled out of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive; nested archives are joined with `/`
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    /// Final path component
    pub fn file_name(&self) -> String {
        Path::new(&self.name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }
}

fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
        .unwrap_or(false)
}

fn collect(bytes: &[u8], ext: &str, prefix: &str, depth: usize, out: &mut Vec<ArchiveEntry>) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| StigqterError::Archive(format!("Failed to open ZIP: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| StigqterError::Archive(format!("Failed to read entry {}: {}", i, e)))?;
        if file.is_dir() {
            continue;
        }

        let name = format!("{}{}", prefix, file.name());
        let wanted = has_extension(&name, ext);
        let nested = has_extension(&name, "zip");
        if !wanted && !nested {
            continue;
        }

        let mut data = Vec::with_capacity(initial_capacity(file.size()));
        file.read_to_end(&mut data)?;

        if wanted {
            debug!("Extracted {}", name);
            out.push(ArchiveEntry { name: name.clone(), data: data.clone() });
        }
        if nested {
            if depth >= MAX_NESTING {
                warn!("Skipping {}: archives nested deeper than {} levels", name, MAX_NESTING);
                continue;
            }
            if let Err(e) = collect(&data, ext, &format!("{}/", name), depth + 1, out) {
                warn!("Skipping nested archive {}: {}", name, e);
            }
        }
    }

    Ok(())
}

/// All files with extension `ext` in the zip (and zips inside it)
pub fn files_from_zip(bytes: &[u8], ext: &str) -> Result<Vec<ArchiveEntry>> {
    let mut out = Vec::new();
    collect(bytes, ext, "", 0, &mut out)?;
    Ok(out)
}

/// All `.xml` files in the zip (and zips inside it)
pub fn xml_files_from_zip(bytes: &[u8]) -> Result<Vec<ArchiveEntry>> {
    files_from_zip(bytes, "xml")
}
