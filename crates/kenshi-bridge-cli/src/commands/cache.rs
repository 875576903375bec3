//! Cache command: inspect or delete the local offset cache.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use kenshi_bridge::BridgeConfig;
use kenshi_bridge::offset::{OffsetCache, remove_cache};

pub fn show(config: &BridgeConfig, any_age: bool) -> Result<()> {
    let path = &config.cache_path;
    if !path.exists() {
        bail!("No offset cache at {}", path.display());
    }

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let max_age = if any_age {
        Duration::MAX
    } else {
        config.cache_max_age()
    };
    let cache = OffsetCache::decode(&bytes, Utc::now(), max_age)
        .with_context(|| format!("Unusable offset cache {}", path.display()))?;

    let age = Utc::now() - cache.created_at;
    println!("Cache: {} ({} hours old)", path.display(), age.num_hours());
    println!(
        "Valid for configured version: {}",
        cache.is_valid_for(config.requested_version())
    );
    println!();
    super::print_entries(&cache.to_database());
    Ok(())
}

pub fn clear(config: &BridgeConfig) -> Result<()> {
    let existed = config.cache_path.exists();
    remove_cache(&config.cache_path)?;
    if existed {
        println!("Deleted {}", config.cache_path.display());
    } else {
        println!("No cache at {}", config.cache_path.display());
    }
    Ok(())
}
