// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use tapestream::record::{scan_segment, ScanStop};
use tapestream::{DirectorySegmentStore, SegmentStore, StoreConfig};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCheck {
    pub segment: String,
    pub records: usize,
    pub valid_bytes: usize,
    pub physical_bytes: u64,
    pub stop: ScanStop,
}

impl SegmentCheck {
    pub fn is_corrupt(&self) -> bool {
        matches!(self.stop, ScanStop::Corrupt { .. })
    }
}

/// Scans every segment in `dir` without opening the store.
pub fn check(dir: &Path) -> anyhow::Result<Vec<SegmentCheck>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a store directory", dir.display());
    }
    let segments = DirectorySegmentStore::open(dir, &StoreConfig::default())?;

    let mut checks = Vec::new();
    for info in segments.list()? {
        let bytes = segments.read(&info)?;
        let scan = scan_segment(&bytes)?;
        match scan.stop {
            ScanStop::End => debug!(segment = %info.name, records = scan.records.len(), "Segment intact"),
            ScanStop::Corrupt { offset, reason } => {
                warn!(segment = %info.name, offset, reason = %reason, "Segment has a damaged tail")
            }
        }
        checks.push(SegmentCheck {
            segment: info.name,
            records: scan.records.len(),
            valid_bytes: scan.valid_len,
            physical_bytes: info.len,
            stop: scan.stop,
        });
    }
    Ok(checks)
}

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let checks = check(dir)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Segment", "Records", "Valid", "Size", "Status"]);

    for c in &checks {
        let status = match c.stop {
            ScanStop::End => "OK".to_string(),
            ScanStop::Corrupt { offset, reason } => format!("CORRUPT at {}: {}", offset, reason),
        };
        table.add_row(vec![
            c.segment.clone(),
            c.records.to_string(),
            c.valid_bytes.to_string(),
            c.physical_bytes.to_string(),
            status,
        ]);
    }
    println!("\n{table}\n");

    let corrupt = checks.iter().filter(|c| c.is_corrupt()).count();
    if corrupt > 0 {
        println!("❌ {} of {} segments have a damaged tail\n", corrupt, checks.len());
        anyhow::bail!("{} corrupt segment(s) in {}", corrupt, dir.display());
    }

    let records: usize = checks.iter().map(|c| c.records).sum();
    println!("✅ VERIFIED: {} segments, {} records\n", checks.len(), records);
    Ok(())
}
