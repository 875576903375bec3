//! Fetch command: download and validate the remote offset document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use kenshi_bridge::BridgeConfig;
use kenshi_bridge::offset::{HttpFetcher, OffsetCache, fetch_document};

pub fn run(
    config: &BridgeConfig,
    game_version: Option<&str>,
    server: Option<&str>,
    output: Option<&Path>,
    save: bool,
) -> Result<()> {
    let mut urls: Vec<String> = server.map(str::to_string).into_iter().collect();
    urls.extend(config.servers.iter().cloned());
    let version = game_version.or(config.requested_version());

    let fetcher = HttpFetcher::new(config.http_timeout());
    let document = fetch_document(&fetcher, &urls, version).context("No offset server answered")?;

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&document.to_json())?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("Document written to {}", path.display());
    } else {
        println!("Document version: {}", document.version);
        println!("Game version:     {}", document.game_version);
        println!("Universal:        {}", document.is_universal);
        println!("Last updated:     {}", document.last_updated);
        if !document.author.is_empty() {
            println!("Author:           {}", document.author);
        }
        if !document.notes.is_empty() {
            println!("Notes:            {}", document.notes);
        }
        println!("Patterns:         {}", document.patterns.len());
        println!();
        super::print_entries(&document.to_database());
    }

    if save {
        OffsetCache::from_database(&document.to_database())
            .save_to_path(&config.cache_path)
            .context("Failed to save offset cache")?;
        eprintln!("Cache saved to {}", config.cache_path.display());
    }

    Ok(())
}
