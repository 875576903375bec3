//! Scan command: resolve anchor patterns against a raw image dump.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use kenshi_bridge::MemoryImage;
use kenshi_bridge::offset::{CRITICAL_ANCHORS, RemoteDocument, ScanValue, Scanner, builtin_anchors};

use super::hex_utils::parse_hex_address;

pub fn run(dump: &Path, base: &str, document: Option<&Path>, json: bool) -> Result<()> {
    let base = parse_hex_address(base)?;
    let image = MemoryImage::from_file(dump, base)
        .with_context(|| format!("Failed to load dump {}", dump.display()))?;
    let host = image.host();
    eprintln!(
        "Loaded {} (base: 0x{:X}, size: 0x{:X})",
        dump.display(),
        host.base,
        host.size
    );

    let mut patterns = builtin_anchors();
    if let Some(path) = document {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read document {}", path.display()))?;
        let remote = RemoteDocument::parse(&text)?;
        eprintln!("Adding {} patterns from {}", remote.patterns.len(), path.display());
        patterns.extend(remote.patterns);
    }

    let results = Scanner::new(&image, host).scan_all(&patterns);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for result in &results {
        let matched = result
            .match_address
            .map(|a| format!("0x{:X}", a))
            .unwrap_or_else(|| "-".to_string());
        let value = match result.value {
            Some(ScanValue::Address(address)) => match host.rva(address) {
                Some(rva) => format!("0x{:X} (rva 0x{:X})", address, rva),
                None => format!("0x{:X}", address),
            },
            Some(ScanValue::Displacement(disp)) => format!("+0x{:X}", disp),
            None => "not found".to_string(),
        };
        println!("{:<28} {:<14} {}", result.name, matched, value);
    }

    let critical = results
        .iter()
        .filter(|r| r.value.is_some() && CRITICAL_ANCHORS.contains(&r.name.as_str()))
        .count();
    println!();
    println!(
        "{}/{} anchors resolved, {} critical",
        results.iter().filter(|r| r.value.is_some()).count(),
        results.len(),
        critical
    );
    if critical == 0 {
        eprintln!("No critical anchor found; a scan of this image would not validate");
    }
    Ok(())
}
