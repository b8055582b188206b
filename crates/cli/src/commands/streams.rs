// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let store = super::open_reader(dir)?;
    let snapshot = store.snapshot()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Stream", "Version"]);

    for name in snapshot.stream_names() {
        let version = snapshot.stream_version(&name);
        table.add_row(vec![name, version.to_string()]);
    }

    println!("\n{} streams, {} records\n", snapshot.stream_count(), snapshot.global_position());
    println!("{table}\n");
    Ok(())
}
