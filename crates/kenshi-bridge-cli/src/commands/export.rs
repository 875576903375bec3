//! Export command: write offset tables as a remote-format document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use kenshi_bridge::BridgeConfig;
use kenshi_bridge::offset::{OffsetCache, RemoteDocument, builtin_anchors, hardcoded_database};

use crate::cli::ExportSource;

pub fn run(config: &BridgeConfig, from: ExportSource, output: Option<&Path>) -> Result<()> {
    let database = match from {
        ExportSource::Builtin => hardcoded_database(),
        ExportSource::Cache => OffsetCache::load_from_path(&config.cache_path, config.cache_max_age())
            .with_context(|| format!("No usable cache at {}", config.cache_path.display()))?
            .to_database(),
    };

    let document = RemoteDocument::from_database(&database, &builtin_anchors());
    let json = serde_json::to_string_pretty(&document.to_json())?;

    match output {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} entries to {}", database.resolved_count(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_export_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");

        run(&BridgeConfig::default(), ExportSource::Builtin, Some(&path)).unwrap();

        let document = RemoteDocument::parse(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(document.is_valid());
        assert_eq!(document.globals, hardcoded_database().globals);
        assert_eq!(document.patterns.len(), builtin_anchors().len());
    }

    #[test]
    fn test_cache_export_needs_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::builder()
            .cache_path(dir.path().join("missing.dat"))
            .build();
        assert!(run(&config, ExportSource::Cache, None).is_err());
    }
}
