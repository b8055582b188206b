// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;

pub fn run(dir: &Path, after: u64, max: usize) -> anyhow::Result<()> {
    let store = super::open_reader(dir)?;
    let records = store.read_all(after, max)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Position", "Stream", "Version", "Payload"]);

    for record in &records {
        table.add_row(vec![
            record.position.to_string(),
            record.stream.to_string(),
            record.version.to_string(),
            super::preview(&record.data, 32),
        ]);
    }

    println!("\nGlobal log: {} of {} records\n", records.len(), store.global_position()?);
    println!("{table}\n");
    Ok(())
}
