//! Change detection for indexed files

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// How file changes are detected between builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Size + modification time (cheap, default)
    #[default]
    Metadata,
    /// Size + CRC32 of the whole file
    Checksum,
}

impl std::str::FromStr for FingerprintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metadata" => Ok(FingerprintMode::Metadata),
            "checksum" => Ok(FingerprintMode::Checksum),
            other => Err(format!("unknown fingerprint mode: {}", other)),
        }
    }
}

/// Identity of a file's contents at indexing time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fingerprint {
    Metadata { size: u64, modified_ns: u64 },
    Checksum { size: u64, crc32: u32 },
}

impl Fingerprint {
    /// Fingerprint a file on disk
    pub fn compute(path: &Path, mode: FingerprintMode) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let size = meta.len();

        match mode {
            FingerprintMode::Metadata => {
                let modified_ns = meta
                    .modified()?
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                Ok(Fingerprint::Metadata { size, modified_ns })
            }
            FingerprintMode::Checksum => {
                let mut reader = BufReader::new(File::open(path)?);
                let mut hasher = crc32fast::Hasher::new();
                let mut buf = [0u8; 64 * 1024];
                loop {
                    let n = reader.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(Fingerprint::Checksum {
                    size,
                    crc32: hasher.finalize(),
                })
            }
        }
    }

    pub fn mode(&self) -> FingerprintMode {
        match self {
            Fingerprint::Metadata { .. } => FingerprintMode::Metadata,
            Fingerprint::Checksum { .. } => FingerprintMode::Checksum,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Fingerprint::Metadata { size, .. } | Fingerprint::Checksum { size, .. } => *size,
        }
    }
}
