//! # Seed Catalog
//!
//! The catalog maps infohashes to local file paths and is what the seed
//! path consults when an inbound peer handshakes: known infohash, serve
//! the file; unknown, drop the connection.
//!
//! On disk it is a JSON object keyed by 40-character lowercase hex:
//!
//! ```json
//! {"0123..ef": "/data/file.bin"}
//! ```
//!
//! The catalog is rewritten only when a descriptor is created or a
//! download completes; seed sessions load a snapshot per handshake and
//! never write.

use anyhow::{anyhow, Result};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The infohash-to-file mapping this node can seed from.
#[derive(Default, Debug)]
pub struct Catalog {
    entries: HashMap<String, String>,
}

impl Catalog {
    /// Load the catalog, treating a missing file as an empty catalog.
    pub fn load(path: &Path) -> Result<Catalog> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Catalog::default()),
            Err(_) => return Err(anyhow!("could not read catalog {:?}", path)),
        };

        if data.is_empty() {
            return Ok(Catalog::default());
        }

        let entries: HashMap<String, String> = match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(_) => return Err(anyhow!("could not decode catalog {:?}", path)),
        };

        Ok(Catalog { entries })
    }

    /// Rewrite the catalog file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(&self.entries)?;
        if fs::write(path, data).is_err() {
            return Err(anyhow!("could not write catalog {:?}", path));
        }

        Ok(())
    }

    /// Record that `file_path` holds the contents behind `info_hash`.
    pub fn insert(&mut self, info_hash: &[u8; 20], file_path: &Path) {
        self.entries
            .insert(to_hex(info_hash), file_path.to_string_lossy().into_owned());
    }

    /// Look up the local file for an infohash.
    pub fn lookup(&self, info_hash: &[u8; 20]) -> Option<PathBuf> {
        self.entries.get(&to_hex(info_hash)).map(PathBuf::from)
    }

    /// Number of seedable files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercase hex rendering of a binary hash, the catalog key format.
pub fn to_hex(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789abcdef";
    let mut encoded = String::with_capacity(data.len() * 2);

    for &byte in data {
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}
