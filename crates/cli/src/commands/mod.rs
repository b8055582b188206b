// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod read;
pub mod streams;
pub mod tail;
pub mod verify;

use std::path::Path;

use anyhow::{bail, Context};
use tapestream::{AppendOnlyStore, StoreConfig};

/// Opens `dir` for inspection. Never takes the writer lock.
pub fn open_reader(dir: &Path) -> anyhow::Result<AppendOnlyStore> {
    if !dir.is_dir() {
        bail!("{} is not a store directory", dir.display());
    }
    AppendOnlyStore::open_directory_reader(dir, StoreConfig::default())
        .with_context(|| format!("failed to open {}", dir.display()))
}

/// Printable form of a payload: UTF-8 text when it is, hex otherwise.
pub fn preview(data: &[u8], limit: usize) -> String {
    let shown = &data[..data.len().min(limit)];
    let mut text = match std::str::from_utf8(shown) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => shown.iter().map(|b| format!("{:02x}", b)).collect(),
    };
    if data.len() > limit {
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview(b"created", 16), "created");
        assert_eq!(preview(&[0, 255], 16), "00ff");
        assert_eq!(preview(b"abcdef", 3), "abc…");
    }
}
