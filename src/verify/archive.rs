//! Archive readability checks.
//!
//! A truncated or corrupted archive may still hash to nothing in particular
//! when no checksum is declared; reading every entry end to end catches it.

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::io::{self, Cursor, Read};

/// Archive formats the verifier knows how to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
    /// Anything else is handed to the platform installer as-is.
    Opaque,
}

impl ArchiveFormat {
    pub fn detect(filename: &str) -> Self {
        let name = filename.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else if name.ends_with(".zip") {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::Opaque
        }
    }
}

/// Reads every entry of the archive. Returns the number of entries.
pub fn check_readable<Rd: Read>(reader: Rd, format: ArchiveFormat) -> Result<usize> {
    let count = match format {
        ArchiveFormat::TarGz => walk_tar_gz(reader)?,
        ArchiveFormat::Zip => walk_zip(reader)?,
        ArchiveFormat::Opaque => return Ok(0),
    };
    if count == 0 {
        bail!("archive contains no entries");
    }
    Ok(count)
}

fn walk_tar_gz<Rd: Read>(reader: Rd) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut count = 0;
    for entry in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry.context("Corrupted tar entry")?;
        io::copy(&mut entry, &mut io::sink()).context("Truncated tar entry")?;
        count += 1;
    }
    // Drain the gzip trailer so its CRC gets checked
    let mut decoder = archive.into_inner();
    io::copy(&mut decoder, &mut io::sink()).context("Corrupted gzip stream")?;
    Ok(count)
}

fn walk_zip<Rd: Read>(mut reader: Rd) -> Result<usize> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .context("Failed to read zip archive")?;
    let mut archive = zip::ZipArchive::new(Cursor::new(buffer)).context("Invalid zip archive")?;
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .with_context(|| format!("Corrupted zip entry #{}", index))?;
        io::copy(&mut file, &mut io::sink())
            .with_context(|| format!("Corrupted zip entry #{}", index))?;
    }
    Ok(archive.len())
}
