//! Remote offset document.
//!
//! The document evolves independently of this crate, so parsing is lenient:
//! unknown fields are ignored, missing fields become zero or empty, and numbers
//! may be JSON numbers, decimal strings or `0x` hex strings.

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::database::{DatabaseMetadata, OffsetDatabase};
use super::entry::OffsetSourceKind;
use super::hardcoded;
use super::pattern::{AnchorPattern, parse_pattern_bytes};
use super::tables::{FunctionOffsets, GlobalOffsets, StructureOffsets};
use crate::error::{Error, Result};

/// Fetches a document body from a URL
pub trait DocumentFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP(S) fetcher
#[cfg(feature = "remote")]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

#[cfg(feature = "remote")]
impl DocumentFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let fetch_error = |e: ureq::Error| Error::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };
        let mut response = self.agent.get(url).call().map_err(fetch_error)?;
        response.body_mut().read_to_string().map_err(fetch_error)
    }
}

/// Append `?version=<v>` unless the URL already carries a query
pub fn request_url(base: &str, version: Option<&str>) -> String {
    match version {
        Some(v) if !v.is_empty() && !base.contains('?') => format!("{}?version={}", base, v),
        _ => base.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub version: i64,
    pub game_version: String,
    pub is_universal: bool,
    pub last_updated: String,
    pub checksum: String,
    pub author: String,
    pub notes: String,
    pub base_address: u64,
    pub globals: GlobalOffsets,
    pub functions: FunctionOffsets,
    pub structures: StructureOffsets,
    pub patterns: Vec<AnchorPattern>,
}

impl RemoteDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let root = value
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("top level is not an object".to_string()))?;
        Ok(Self::from_object(root))
    }

    fn from_object(root: &Map<String, Value>) -> Self {
        let offsets = root.get("offsets").and_then(Value::as_object);
        let mut globals = GlobalOffsets::default();
        for (key, remote) in GlobalOffsets::KEYS.iter().zip(GlobalOffsets::REMOTE_KEYS) {
            globals.set(key, number(offsets.and_then(|o| o.get(*remote))) as u64);
        }

        let function_offsets = root.get("functionOffsets").and_then(Value::as_object);
        let mut functions = FunctionOffsets::default();
        for (key, remote) in FunctionOffsets::KEYS.iter().zip(FunctionOffsets::REMOTE_KEYS) {
            functions.set(key, number(function_offsets.and_then(|o| o.get(*remote))) as u64);
        }

        // A missing group keeps the compiled-in values; a missing key inside a
        // present group is zero
        let structure_offsets = root.get("structureOffsets").and_then(Value::as_object);
        let mut structures = hardcoded::structure_offsets();
        for (key, remote) in StructureOffsets::KEYS.iter().zip(StructureOffsets::REMOTE_KEYS) {
            let Some((group, field)) = remote.split_once('.') else {
                continue;
            };
            if let Some(group) = structure_offsets
                .and_then(|s| s.get(group))
                .and_then(Value::as_object)
            {
                structures.set(key, number(group.get(field)) as i32);
            }
        }

        let patterns = match root.get("patterns") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, def)| parse_remote_pattern(key, def))
                .collect(),
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|def| parse_remote_pattern("", def))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            version: number(root.get("version")),
            game_version: text(root.get("gameVersion")),
            is_universal: flag(root.get("isUniversal")),
            last_updated: text(root.get("lastUpdated")),
            checksum: text(root.get("checksum")),
            author: text(root.get("author")),
            notes: text(root.get("notes")),
            base_address: number(offsets.and_then(|o| o.get("baseAddress"))) as u64,
            globals,
            functions,
            structures,
            patterns,
        }
    }

    /// At least one critical global is non-zero
    pub fn is_valid(&self) -> bool {
        self.globals.has_critical()
    }

    pub fn to_database(&self) -> OffsetDatabase {
        let mut metadata =
            DatabaseMetadata::new(self.game_version.clone()).universal(self.is_universal);
        metadata.checksum = self.checksum.clone();
        OffsetDatabase::new(
            OffsetSourceKind::Remote,
            metadata,
            self.globals,
            self.functions,
            self.structures,
        )
    }

    /// Remote-format document describing `database`
    pub fn from_database(database: &OffsetDatabase, patterns: &[AnchorPattern]) -> Self {
        Self {
            version: database.metadata.schema_version as i64,
            game_version: database.metadata.game_version.clone(),
            is_universal: database.metadata.is_universal,
            last_updated: database.metadata.created_at.format("%Y-%m-%d").to_string(),
            checksum: database.metadata.checksum.clone(),
            author: String::new(),
            notes: format!("Exported from {} offsets", database.source),
            base_address: 0,
            globals: database.globals,
            functions: database.functions,
            structures: database.structures,
            patterns: patterns.to_vec(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut offsets = Map::new();
        offsets.insert("baseAddress".to_string(), hex(self.base_address));
        for (key, value) in self.globals.iter() {
            if let Some(remote) = GlobalOffsets::remote_key(key) {
                offsets.insert(remote.to_string(), hex(value));
            }
        }

        let mut functions = Map::new();
        for (key, value) in self.functions.iter() {
            if let Some(remote) = FunctionOffsets::remote_key(key) {
                functions.insert(remote.to_string(), hex(value));
            }
        }

        let mut structures = Map::new();
        for (key, value) in self.structures.iter() {
            let Some((group, field)) = StructureOffsets::remote_key(key).and_then(|r| r.split_once('.'))
            else {
                continue;
            };
            let group = structures
                .entry(group.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(group) = group {
                group.insert(field.to_string(), json!(format!("{:#x}", value)));
            }
        }

        let mut patterns = Map::new();
        for pattern in &self.patterns {
            let (bytes, mask) = pattern.to_masked();
            patterns.insert(
                lower_camel(&pattern.name),
                json!({
                    "name": pattern.name,
                    "pattern": bytes,
                    "mask": mask,
                    "offset": pattern.offset,
                    "isRelative": pattern.is_relative,
                    "relativeBase": pattern.relative_base,
                }),
            );
        }

        json!({
            "version": self.version,
            "gameVersion": self.game_version,
            "isUniversal": self.is_universal,
            "lastUpdated": self.last_updated,
            "checksum": self.checksum,
            "author": self.author,
            "notes": self.notes,
            "offsets": offsets,
            "functionOffsets": functions,
            "structureOffsets": structures,
            "patterns": patterns,
        })
    }
}

/// Try each URL in order and return the first document that parses and validates
pub fn fetch_document(
    fetcher: &dyn DocumentFetcher,
    urls: &[String],
    version: Option<&str>,
) -> Result<RemoteDocument> {
    fetch_document_keeping_patterns(fetcher, urls, version).0
}

/// [`fetch_document`], also returning the patterns of documents that parsed
/// but were rejected for their tables. Those patterns can still be scanned.
pub fn fetch_document_keeping_patterns(
    fetcher: &dyn DocumentFetcher,
    urls: &[String],
    version: Option<&str>,
) -> (Result<RemoteDocument>, Vec<AnchorPattern>) {
    let mut last_error = None;
    let mut rejected_patterns: Vec<AnchorPattern> = Vec::new();

    for base in urls {
        let url = request_url(base, version);
        debug!("Fetching offsets from {}", url);

        let body = match fetcher.fetch(&url) {
            Ok(body) => body,
            Err(e) => {
                warn!("Offset server {} failed: {}", url, e);
                last_error = Some(e);
                continue;
            }
        };

        match RemoteDocument::parse(&body) {
            Ok(doc) if doc.is_valid() => {
                info!(
                    "Fetched offsets from {} (game version: {}, universal: {})",
                    url, doc.game_version, doc.is_universal
                );
                return (Ok(doc), rejected_patterns);
            }
            Ok(doc) => {
                warn!("Offsets from {} have no critical pointers, skipping", url);
                for pattern in doc.patterns {
                    if !rejected_patterns.iter().any(|p| p.name.eq_ignore_ascii_case(&pattern.name)) {
                        rejected_patterns.push(pattern);
                    }
                }
                last_error = Some(Error::InvalidDocument(format!(
                    "{}: all critical offsets are zero",
                    url
                )));
            }
            Err(e) => {
                warn!("Failed to parse offsets from {}: {}", url, e);
                last_error = Some(e);
            }
        }
    }

    let error = last_error.unwrap_or_else(|| Error::Fetch {
        url: String::new(),
        message: "no offset servers configured".to_string(),
    });
    (Err(error), rejected_patterns)
}

fn parse_remote_pattern(key: &str, def: &Value) -> Option<AnchorPattern> {
    let def = def.as_object()?;
    let name = match text(def.get("name")) {
        n if n.is_empty() => key.to_string(),
        n => n,
    };
    let pattern = text(def.get("pattern"));
    let mask = text(def.get("mask"));
    let offset = number(def.get("offset")) as i32;
    let is_relative = flag(def.get("isRelative"));
    let relative_base = number(def.get("relativeBase")) as i32;

    let parsed = if mask.is_empty() {
        AnchorPattern::from_ida(&name, &pattern, offset, is_relative, relative_base)
    } else {
        parse_pattern_bytes(&pattern).and_then(|bytes| {
            AnchorPattern::from_masked(&name, &bytes, &mask, offset, is_relative, relative_base)
        })
    };

    match parsed {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("Ignoring remote pattern {}: {}", name, e);
            None
        }
    }
}

/// Lenient number: JSON number, decimal string or `0x` hex string; anything else is zero
fn number(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|v| v as i64))
            .or_else(|| n.as_f64().map(|v| v as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_number(s).unwrap_or(0),
        Some(Value::Bool(b)) => *b as i64,
        _ => 0,
    }
}

pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok()? as i64,
        None => digits.parse::<u64>().ok()? as i64,
    };
    Some(if negative { -value } else { value })
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}

fn hex(value: u64) -> Value {
    json!(format!("{:#x}", value))
}

fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
