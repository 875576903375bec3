//! CLI command implementations.

pub mod cache;
pub mod export;
pub mod fetch;
pub mod hex_utils;
pub mod scan;

use kenshi_bridge::OffsetDatabase;

/// Print every entry of `database` as an aligned table
pub(crate) fn print_entries(database: &OffsetDatabase) {
    let meta = &database.metadata;
    println!(
        "Source: {}  Game version: {}  Universal: {}",
        database.source,
        if meta.game_version.is_empty() { "-" } else { &meta.game_version },
        meta.is_universal
    );
    println!("Created: {}  Checksum: {}", meta.created_at, meta.checksum);
    println!();

    for entry in database.entries() {
        let source = if entry.source == database.source {
            String::new()
        } else {
            format!(" ({})", entry.source)
        };
        println!(
            "{:<16} {:<44} 0x{:X}{}",
            entry.category.to_string(),
            entry.name,
            entry.value,
            source
        );
    }
    println!();
    println!("{} entries resolved", database.resolved_count());
}
