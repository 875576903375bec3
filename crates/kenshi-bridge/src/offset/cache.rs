//! Local cache of remotely fetched offsets
//!
//! Saves the last validated remote tables to a small binary file and reuses
//! them on later runs, skipping the network when the host version matches.
//!
//! Layout (little-endian): magic, schema, UNIX timestamp (u64), version length
//! (u32, at most 64) and bytes, then the global, function and structure tables
//! in declaration order.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use super::database::{DatabaseMetadata, OffsetDatabase, SCHEMA_VERSION};
use super::entry::OffsetSourceKind;
use super::tables::{FunctionOffsets, GlobalOffsets, StructureOffsets};
use crate::error::{Error, Result};

/// "KOFF"
pub const CACHE_MAGIC: u32 = 0x4B4F_4646;

pub const DEFAULT_CACHE_FILE: &str = "kenshi_offsets_cache.dat";

/// Maximum age for cache validity (7 days)
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const MAX_VERSION_LEN: usize = 64;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetCache {
    pub game_version: String,
    pub created_at: DateTime<Utc>,
    pub globals: GlobalOffsets,
    pub functions: FunctionOffsets,
    pub structures: StructureOffsets,
}

impl OffsetCache {
    pub fn from_database(database: &OffsetDatabase) -> Self {
        Self {
            game_version: database.metadata.game_version.clone(),
            created_at: Utc::now(),
            globals: database.globals,
            functions: database.functions,
            structures: database.structures,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let version = truncate_version(&self.game_version);
        let mut out = Vec::with_capacity(
            HEADER_LEN
                + version.len()
                + GlobalOffsets::encoded_len()
                + FunctionOffsets::encoded_len()
                + StructureOffsets::encoded_len(),
        );

        out.extend_from_slice(&CACHE_MAGIC.to_le_bytes());
        out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.created_at.timestamp().max(0) as u64).to_le_bytes());
        out.extend_from_slice(&(version.len() as u32).to_le_bytes());
        out.extend_from_slice(version);
        self.globals.encode(&mut out);
        self.functions.encode(&mut out);
        self.structures.encode(&mut out);
        out
    }

    /// Decode a cache file body. Any mismatch or an expired timestamp is `StaleCache`.
    pub fn decode(bytes: &[u8], now: DateTime<Utc>, max_age: Duration) -> Result<Self> {
        let mut reader = Cursor { bytes, pos: 0 };

        let magic = reader.u32()?;
        if magic != CACHE_MAGIC {
            return Err(Error::StaleCache(format!("bad magic {:#010x}", magic)));
        }
        let schema = reader.u32()?;
        if schema != SCHEMA_VERSION {
            return Err(Error::StaleCache(format!(
                "schema {} (expected {})",
                schema, SCHEMA_VERSION
            )));
        }

        let timestamp = reader.u64()?;
        let created_at = Utc
            .timestamp_opt(timestamp as i64, 0)
            .single()
            .ok_or_else(|| Error::StaleCache(format!("invalid timestamp {}", timestamp)))?;
        let age = now.signed_duration_since(created_at);
        if age < chrono::Duration::zero() {
            return Err(Error::StaleCache(format!(
                "written in the future ({})",
                created_at.to_rfc3339()
            )));
        }
        if age.num_seconds() > i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX) {
            return Err(Error::StaleCache(format!(
                "expired ({} days old)",
                age.num_days()
            )));
        }

        let version_len = reader.u32()? as usize;
        if version_len > MAX_VERSION_LEN {
            return Err(Error::StaleCache(format!(
                "version length {} exceeds {}",
                version_len, MAX_VERSION_LEN
            )));
        }
        let game_version = String::from_utf8_lossy(reader.take(version_len)?).into_owned();

        let globals = GlobalOffsets::decode(reader.take(GlobalOffsets::encoded_len())?)
            .ok_or_else(truncated)?;
        let functions = FunctionOffsets::decode(reader.take(FunctionOffsets::encoded_len())?)
            .ok_or_else(truncated)?;
        let structures = StructureOffsets::decode(reader.take(StructureOffsets::encoded_len())?)
            .ok_or_else(truncated)?;

        Ok(Self {
            game_version,
            created_at,
            globals,
            functions,
            structures,
        })
    }

    /// Load cache from a specific path, treating a stale or unreadable file as absent
    pub fn load_from_path<P: AsRef<Path>>(path: P, max_age: Duration) -> Option<Self> {
        let path = path.as_ref();

        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                debug!("Cache file not found or unreadable: {}", e);
                return None;
            }
        };

        match Self::decode(&bytes, Utc::now(), max_age) {
            Ok(cache) => {
                debug!(
                    "Loaded cache: version={}, created_at={}",
                    cache.game_version, cache.created_at
                );
                Some(cache)
            }
            Err(e) => {
                warn!("Ignoring offset cache {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.encode())?;
        info!("Saved offset cache to {}", path.display());
        Ok(())
    }

    /// Usable when no version was requested or the cached version matches
    pub fn is_valid_for(&self, game_version: Option<&str>) -> bool {
        let version_ok = match game_version {
            None | Some("") => true,
            Some(v) => v == self.game_version,
        };
        if !version_ok {
            debug!(
                "Cache version mismatch: cached={}, requested={:?}",
                self.game_version, game_version
            );
            return false;
        }

        if !self.globals.has_critical() {
            debug!("Cached offsets are invalid (critical pointers are zero)");
            return false;
        }

        true
    }

    pub fn to_database(&self) -> OffsetDatabase {
        OffsetDatabase::new(
            OffsetSourceKind::Remote,
            DatabaseMetadata::new(self.game_version.clone()).created_at(self.created_at),
            self.globals,
            self.functions,
            self.structures,
        )
    }
}

/// Delete the cache file; a missing file is not an error
pub fn remove_cache<P: AsRef<Path>>(path: P) -> Result<()> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => {
            info!("Removed offset cache {}", path.as_ref().display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn truncate_version(version: &str) -> &[u8] {
    let bytes = version.as_bytes();
    &bytes[..bytes.len().min(MAX_VERSION_LEN)]
}

fn truncated() -> Error {
    Error::StaleCache("truncated".to_string())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or_else(truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}
