// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;

pub fn run(dir: &Path, stream: &str, after: u64, max: usize) -> anyhow::Result<()> {
    let store = super::open_reader(dir)?;
    let records = store.read_stream(stream, after, max)?;

    if records.is_empty() {
        println!("\nNo records in '{}' after version {}\n", stream, after);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Version", "Bytes", "Payload"]);

    for record in records {
        table.add_row(vec![
            record.version.to_string(),
            record.data.len().to_string(),
            super::preview(&record.data, 48),
        ]);
    }

    println!("\nStream '{}' (version {})\n", stream, store.stream_version(stream)?);
    println!("{table}\n");
    Ok(())
}
