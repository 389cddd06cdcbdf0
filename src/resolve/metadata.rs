//! Author-declared dependency metadata.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;

const PKGINFO: &str = ".PKGINFO";

/// `zfs-utils=2.2.7` → `zfs-utils`, `glibc>=2.38` → `glibc`.
pub fn strip_version_constraint(dependency: &str) -> &str {
    dependency
        .split(['<', '>', '='])
        .next()
        .unwrap_or(dependency)
        .trim()
}

/// Dependencies listed in a `.PKGINFO` document (`depend = name` lines).
pub fn parse_pkginfo(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(field, _)| field.trim() == "depend")
        .map(|(_, value)| strip_version_constraint(value.trim()))
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Dependencies from the `.PKGINFO` embedded in a gzip-compressed tarball.
///
/// Returns `None` when the archive carries no `.PKGINFO`.
pub fn embedded_dependencies<Rd: Read>(reader: Rd) -> Result<Option<Vec<String>>> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    for entry in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry.context("Corrupted tar entry")?;
        let is_pkginfo = entry.path().context("Invalid entry path")? == Path::new(PKGINFO);
        if !is_pkginfo {
            continue;
        }
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .context("Failed to read .PKGINFO")?;
        return Ok(Some(parse_pkginfo(&text)));
    }
    Ok(None)
}
