use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::Path;

use crate::filesystem::FileSystem;

/// Stream `reader` to its end and return the SHA-256 digest as lowercase hex.
pub fn fingerprint<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Content fingerprint of the file at `path`.
///
/// Two files have identical content iff their fingerprints are equal.
pub fn fingerprint_file(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let reader = fs.open(path)?;
    fingerprint(reader).with_context(|| format!("Failed to read file: {}", path.display()))
}
