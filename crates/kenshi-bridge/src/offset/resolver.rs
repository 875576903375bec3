//! Offset resolution across the remote table, a local scan and the compiled-in table.
//!
//! Sources are tried in strict priority order and the first one that both
//! succeeds and validates wins; results from different sources are never
//! merged, except that a scan fills the names it did not find from the
//! compiled-in table. The resolver owns the current [`OffsetDatabase`];
//! callers get an `Arc` to it, so a reload is seen by every later lookup.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::cache::{OffsetCache, remove_cache};
use super::database::{DatabaseMetadata, OffsetDatabase};
use super::entry::{OffsetCategory, OffsetSourceKind};
use super::hardcoded;
use super::pattern::{AnchorPattern, CRITICAL_ANCHORS, builtin_anchors};
use super::remote::{DocumentFetcher, RemoteDocument, fetch_document_keeping_patterns};
use super::scanner::{ScanValue, Scanner};
use super::tables::{FunctionOffsets, GlobalOffsets, StructureOffsets};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::memory::{HostHandle, ReadMemory};

#[derive(Default)]
struct ResolverState {
    database: Option<Arc<OffsetDatabase>>,
    /// Patterns carried by the last remote document, kept across reloads
    remote_patterns: Vec<AnchorPattern>,
}

pub struct OffsetResolver {
    config: BridgeConfig,
    host: HostHandle,
    fetcher: Option<Arc<dyn DocumentFetcher>>,
    memory: Option<Arc<dyn ReadMemory + Send + Sync>>,
    state: Mutex<ResolverState>,
}

impl OffsetResolver {
    /// A resolver with no remote fetcher and no memory to scan; only the
    /// compiled-in table is available until those are attached.
    pub fn new(config: BridgeConfig, host: HostHandle) -> Self {
        Self {
            config,
            host,
            fetcher: None,
            memory: None,
            state: Mutex::new(ResolverState::default()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn ReadMemory + Send + Sync>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn host(&self) -> HostHandle {
        self.host
    }

    /// Resolve offsets if not done yet.
    ///
    /// Fails with `ResolutionFailure` only when no source validates, which
    /// cannot happen while the compiled-in table has its critical pointers.
    pub fn initialize(&self) -> Result<Arc<OffsetDatabase>> {
        if let Some(database) = self.snapshot() {
            return Ok(database);
        }

        // Sources may touch the network; the state lock is not held meanwhile
        let (database, remote_patterns) = self.resolve()?;
        let database = Arc::new(database);

        let mut state = self.lock();
        state.database = Some(Arc::clone(&database));
        state.remote_patterns = remote_patterns;
        Ok(database)
    }

    /// Drop the current snapshot and resolve again
    pub fn reload(&self) -> Result<Arc<OffsetDatabase>> {
        self.lock().database = None;
        info!("Reloading offsets");
        self.initialize()
    }

    /// Delete the local cache so the next resolution fetches, then reload
    pub fn refresh(&self) -> Result<Arc<OffsetDatabase>> {
        remove_cache(&self.config.cache_path)?;
        self.reload()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().database.is_some()
    }

    pub fn snapshot(&self) -> Option<Arc<OffsetDatabase>> {
        self.lock().database.clone()
    }

    pub fn current_source(&self) -> Option<OffsetSourceKind> {
        self.lock().database.as_ref().map(|db| db.source)
    }

    /// Module-relative value of `group.name` (e.g. `"Game"`, `"WorldInstance"`); 0 if unresolved
    pub fn get_offset(&self, group: &str, name: &str) -> u64 {
        let key = format!("{}.{}", group, name);
        self.value(OffsetCategory::Global, &key)
            .map(|v| v as u64)
            .unwrap_or(0)
    }

    /// Absolute address of a global; 0 if unresolved
    pub fn get_absolute(&self, group: &str, name: &str) -> u64 {
        self.absolute(self.get_offset(group, name))
    }

    /// Absolute address of a global by qualified key; 0 if unresolved
    pub fn global(&self, key: &str) -> u64 {
        let offset = self
            .value(OffsetCategory::Global, key)
            .map(|v| v as u64)
            .unwrap_or(0);
        self.absolute(offset)
    }

    /// Absolute entry point of a native function; 0 if unresolved
    pub fn get_function(&self, name: &str) -> u64 {
        let offset = self
            .value(OffsetCategory::Function, name)
            .map(|v| v as u64)
            .unwrap_or(0);
        self.absolute(offset)
    }

    /// Displacement of `structure.field`; 0 if unresolved
    pub fn get_structure_field_offset(&self, structure: &str, field: &str) -> i32 {
        let key = format!("{}.{}", structure, field);
        self.value(OffsetCategory::StructureField, &key)
            .map(|v| v as i32)
            .unwrap_or(0)
    }

    /// Patterns the scanner uses: built-ins, overridden by same-named remote ones
    pub fn anchor_patterns(&self) -> Vec<AnchorPattern> {
        let remote = self.lock().remote_patterns.clone();
        merge_patterns(builtin_anchors(), remote)
    }

    fn value(&self, category: OffsetCategory, key: &str) -> Option<i64> {
        let value = self.snapshot()?.get(category, key);
        if value.is_none_or(|v| v == 0) {
            debug!("Offset {} ({}) is unresolved", key, category);
        }
        value.filter(|v| *v != 0)
    }

    fn absolute(&self, offset: u64) -> u64 {
        if offset == 0 {
            0
        } else {
            self.host.base.wrapping_add(offset)
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The winning database plus the remote patterns to keep
    fn resolve(&self) -> Result<(OffsetDatabase, Vec<AnchorPattern>)> {
        let mut remote_patterns = self.lock().remote_patterns.clone();

        if self.config.prefer_remote {
            let (outcome, patterns) = self.try_remote();
            if !patterns.is_empty() {
                remote_patterns = patterns;
            }
            match outcome {
                Ok(database) => {
                    info!(
                        "Using remote offsets (game version: {})",
                        database.metadata.game_version
                    );
                    return Ok((database, remote_patterns));
                }
                Err(e) => warn!("Remote offsets unavailable: {}", e),
            }
        }

        if self.config.allow_pattern_scan {
            match self.try_scan(&remote_patterns) {
                Ok(database) => {
                    info!(
                        "Using scanned offsets ({} entries resolved)",
                        database.resolved_count()
                    );
                    return Ok((database, remote_patterns));
                }
                Err(e) => warn!("Pattern scan unusable: {}", e),
            }
        }

        let database = hardcoded::hardcoded_database();
        if !database.is_valid() {
            return Err(Error::ResolutionFailure(
                "every offset source failed validation".to_string(),
            ));
        }
        info!(
            "Using hardcoded offsets (game version: {})",
            database.metadata.game_version
        );
        Ok((database, remote_patterns))
    }

    /// Cache or remote tables, plus the patterns of any document that parsed
    /// (even one rejected for its tables)
    fn try_remote(&self) -> (Result<OffsetDatabase>, Vec<AnchorPattern>) {
        let version = self.config.requested_version();

        if let Some(cache) =
            OffsetCache::load_from_path(&self.config.cache_path, self.config.cache_max_age())
        {
            if cache.is_valid_for(version) {
                info!("Using cached offsets (version: {})", cache.game_version);
                return (Ok(cache.to_database()), Vec::new());
            }
        }

        let Some(fetcher) = self.fetcher.as_deref() else {
            let error = Error::ResolutionFailure("no offset fetcher configured".to_string());
            return (Err(error), Vec::new());
        };
        let (document, rejected_patterns) =
            fetch_document_keeping_patterns(fetcher, &self.config.servers, version);
        let document: RemoteDocument = match document {
            Ok(document) => document,
            Err(e) => return (Err(e), rejected_patterns),
        };
        let database = document.to_database();

        if let Err(e) = OffsetCache::from_database(&database).save_to_path(&self.config.cache_path) {
            warn!("Failed to save offset cache: {}", e);
        }

        (Ok(database), document.patterns)
    }

    fn try_scan(&self, remote_patterns: &[AnchorPattern]) -> Result<OffsetDatabase> {
        let memory = self
            .memory
            .as_deref()
            .ok_or_else(|| Error::ResolutionFailure("no host memory to scan".to_string()))?;

        let patterns = merge_patterns(builtin_anchors(), remote_patterns.to_vec());
        if !remote_patterns.is_empty() {
            debug!("Scanning with {} remote patterns", remote_patterns.len());
        }
        let results = Scanner::new(memory, self.host).scan_all(&patterns);

        let critical_found = results.iter().any(|r| {
            r.value.is_some() && CRITICAL_ANCHORS.iter().any(|c| c.eq_ignore_ascii_case(&r.name))
        });
        if !critical_found {
            return Err(Error::ResolutionFailure(
                "no critical anchor was found".to_string(),
            ));
        }

        let mut globals = hardcoded::global_offsets();
        let mut functions = hardcoded::function_offsets();
        let mut structures = hardcoded::structure_offsets();
        let mut scanned: Vec<&'static str> = Vec::new();

        for (pattern, result) in patterns.iter().zip(&results) {
            let (Some((category, key)), Some(value)) = (pattern.target(), result.value) else {
                continue;
            };
            let stored = match (category, value) {
                (OffsetCategory::Global, ScanValue::Address(address)) => {
                    self.host.rva(address).is_some_and(|rva| globals.set(key, rva))
                }
                (OffsetCategory::Function, ScanValue::Address(address)) => {
                    self.host.rva(address).is_some_and(|rva| functions.set(key, rva))
                }
                (OffsetCategory::StructureField, ScanValue::Displacement(disp)) => {
                    structures.set(key, disp)
                }
                _ => false,
            };
            if stored {
                scanned.push(key);
            } else {
                debug!("Scanned {} resolved outside the host image", pattern.name);
            }
        }

        let fallback = GlobalOffsets::KEYS
            .iter()
            .chain(FunctionOffsets::KEYS)
            .chain(StructureOffsets::KEYS)
            .copied()
            .filter(|key| !scanned.contains(key));

        let database = OffsetDatabase::new(
            OffsetSourceKind::Scanned,
            DatabaseMetadata::new(self.config.game_version.clone()),
            globals,
            functions,
            structures,
        )
        .with_fallback(fallback);

        if !database.is_valid() {
            return Err(Error::ResolutionFailure(
                "scanned critical pointers are zero".to_string(),
            ));
        }
        Ok(database)
    }
}

fn merge_patterns(builtin: Vec<AnchorPattern>, remote: Vec<AnchorPattern>) -> Vec<AnchorPattern> {
    let mut merged: Vec<AnchorPattern> = builtin
        .into_iter()
        .filter(|b| !remote.iter().any(|r| r.name.eq_ignore_ascii_case(&b.name)))
        .collect();
    merged.extend(remote);
    merged
}

#[cfg(test)]
mod tests {
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::memory::{MemoryImage, Protection};
    use crate::offset::remote::tests::{DOCUMENT, FakeFetcher};

    const BASE: u64 = 0x1_4000_0000;

    fn config(dir: &TempDir) -> BridgeConfig {
        BridgeConfig::builder()
            .servers(["https://offsets/a"])
            .cache_path(dir.path().join("cache.dat"))
            .build()
    }

    /// Image with the GameWorld anchor pointing at rva 0x3000
    fn scannable_image() -> Arc<MemoryImage> {
        let mut data = vec![0xCCu8; 0x4000];
        let disp = (0x3000i32 - 0x107).to_le_bytes();
        let code = [
            0x48, 0x8B, 0x05, disp[0], disp[1], disp[2], disp[3], 0x48, 0x85, 0xC0, 0x74, 0x05,
            0x48, 0x8B, 0x40, 0x08,
        ];
        data[0x100..0x100 + code.len()].copy_from_slice(&code);
        Arc::new(MemoryImage::new().with_section(BASE, data, Protection::ExecuteRead))
    }

    fn resolver(dir: &TempDir, fetcher: FakeFetcher) -> OffsetResolver {
        let image = scannable_image();
        OffsetResolver::new(config(dir), image.host())
            .with_fetcher(Arc::new(fetcher))
            .with_memory(image)
    }

    #[test]
    fn test_remote_wins_over_scan() {
        let dir = tempdir().unwrap();
        let resolver = resolver(&dir, FakeFetcher::default().serve("https://offsets/a", DOCUMENT));

        let db = resolver.initialize().unwrap();
        assert_eq!(db.source, OffsetSourceKind::Remote);
        assert_eq!(resolver.current_source(), Some(OffsetSourceKind::Remote));
        assert_eq!(resolver.get_offset("Game", "WorldInstance"), 0x24D_9000);
        // Remote left it zero; never merged from another source
        assert_eq!(resolver.get_offset("Engine", "Camera"), 0);
        assert_eq!(resolver.get_absolute("Engine", "Camera"), 0);
        assert_eq!(resolver.anchor_patterns().len(), 21);
    }

    #[test]
    fn test_scan_used_when_remote_fails() {
        let dir = tempdir().unwrap();
        let resolver = resolver(&dir, FakeFetcher::default());

        let db = resolver.initialize().unwrap();
        assert_eq!(db.source, OffsetSourceKind::Scanned);
        assert_eq!(resolver.get_offset("Game", "WorldInstance"), 0x3000);
        assert_eq!(resolver.get_absolute("Game", "WorldInstance"), BASE + 0x3000);

        // Gaps come from the compiled-in table and are tagged as such
        let entries = db.entries();
        let world = entries.iter().find(|e| e.name == "Game.WorldInstance").unwrap();
        assert_eq!(world.source, OffsetSourceKind::Scanned);
        let spawn = entries.iter().find(|e| e.name == "SpawnCharacter").unwrap();
        assert_eq!(spawn.source, OffsetSourceKind::Hardcoded);
        assert_eq!(resolver.get_function("SpawnCharacter"), BASE + 0x8B_3C80);
    }

    #[test]
    fn test_hardcoded_when_nothing_else_validates() {
        let dir = tempdir().unwrap();
        let empty = Arc::new(MemoryImage::new().with_section(
            BASE,
            vec![0; 0x100],
            Protection::ExecuteRead,
        ));
        let resolver = OffsetResolver::new(config(&dir), empty.host())
            .with_fetcher(Arc::new(FakeFetcher::default().serve("https://offsets/a", "{}")))
            .with_memory(empty);

        resolver.initialize().unwrap();
        assert_eq!(resolver.current_source(), Some(OffsetSourceKind::Hardcoded));
        assert_eq!(resolver.get_structure_field_offset("Character", "Health"), 0xC0);
        assert_eq!(resolver.get_structure_field_offset("Character", "Nope"), 0);
    }

    #[test]
    fn test_preferences_skip_sources() {
        let dir = tempdir().unwrap();
        let image = scannable_image();
        let config = BridgeConfig::builder()
            .servers(["https://offsets/a"])
            .cache_path(dir.path().join("cache.dat"))
            .prefer_remote(false)
            .build();
        let fetcher = Arc::new(FakeFetcher::default().serve("https://offsets/a", DOCUMENT));
        let resolver = OffsetResolver::new(config, image.host())
            .with_fetcher(fetcher.clone())
            .with_memory(image);

        resolver.initialize().unwrap();
        assert_eq!(resolver.current_source(), Some(OffsetSourceKind::Scanned));
        assert_eq!(fetcher.request_count(), 0);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::default().serve("https://offsets/a", DOCUMENT));
        let image = scannable_image();
        let resolver = OffsetResolver::new(config(&dir), image.host())
            .with_fetcher(fetcher.clone())
            .with_memory(image);

        let first = resolver.reload().unwrap();
        let second = resolver.reload().unwrap();
        assert_eq!(first.entries(), second.entries());
        assert_eq!(first.source, second.source);
        // Second reload was served from the cache written by the first
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn test_refresh_deletes_cache_and_fetches() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::default().serve("https://offsets/a", DOCUMENT));
        let image = scannable_image();
        let resolver = OffsetResolver::new(config(&dir), image.host())
            .with_fetcher(fetcher.clone())
            .with_memory(image);

        resolver.initialize().unwrap();
        assert!(dir.path().join("cache.dat").exists());
        resolver.refresh().unwrap();
        assert_eq!(fetcher.request_count(), 2);
    }

    /// Tables with no critical pointers, but a GameWorld pattern for a
    /// `mov rcx, [rip+x]` form the built-in anchor does not know
    const PATTERN_ONLY_DOCUMENT: &str = r#"{
        "version": 3,
        "gameVersion": "1.0.65",
        "offsets": {},
        "patterns": {
            "gameWorld": {
                "name": "GameWorld",
                "pattern": "48 8B 0D ?? ?? ?? ?? 48 85 C9",
                "offset": 3,
                "isRelative": true,
                "relativeBase": 7
            }
        }
    }"#;

    #[test]
    fn test_rejected_document_patterns_reach_the_scan() {
        let dir = tempdir().unwrap();
        let mut data = vec![0xCCu8; 0x4000];
        let disp = (0x3000i32 - 0x107).to_le_bytes();
        let code = [0x48, 0x8B, 0x0D, disp[0], disp[1], disp[2], disp[3], 0x48, 0x85, 0xC9];
        data[0x100..0x100 + code.len()].copy_from_slice(&code);
        let image = Arc::new(MemoryImage::new().with_section(BASE, data, Protection::ExecuteRead));
        let fetcher = FakeFetcher::default().serve("https://offsets/a", PATTERN_ONLY_DOCUMENT);
        let resolver = OffsetResolver::new(config(&dir), image.host())
            .with_fetcher(Arc::new(fetcher))
            .with_memory(image);

        let db = resolver.initialize().unwrap();
        assert_eq!(db.source, OffsetSourceKind::Scanned);
        assert_eq!(resolver.get_offset("Game", "WorldInstance"), 0x3000);

        let patterns = resolver.anchor_patterns();
        assert_eq!(patterns.len(), 21);
        let world = patterns.iter().find(|p| p.name == "GameWorld").unwrap();
        assert_eq!(world.bytes[2], Some(0x0D));

        // Still scanned after a reload
        resolver.reload().unwrap();
        assert_eq!(resolver.current_source(), Some(OffsetSourceKind::Scanned));
        assert_eq!(resolver.get_offset("Game", "WorldInstance"), 0x3000);
    }

    #[test]
    fn test_unresolved_lookups_return_zero_before_init() {
        let dir = tempdir().unwrap();
        let resolver = OffsetResolver::new(config(&dir), HostHandle::new(BASE, 0x1000));
        assert!(!resolver.is_initialized());
        assert_eq!(resolver.get_function("SpawnCharacter"), 0);
        assert_eq!(resolver.global("Game.WorldInstance"), 0);
    }
}
