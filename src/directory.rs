//! Discovery and naming of segment files inside the log directory.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{Result, WalError};

pub const SEGMENT_PREFIX: &str = "segment-";

pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{index}"))
}

/// Extracts the segment index from a file name.
///
/// Returns `None` for files that do not carry the segment prefix; a file that
/// carries the prefix but whose suffix is not a plain decimal integer (this
/// includes a `.tmp` leftover from an interrupted repair) is a configuration
/// error the operator has to resolve.
fn parse_index(name: &str) -> Result<Option<u64>> {
    let Some(suffix) = name.strip_prefix(SEGMENT_PREFIX) else {
        return Ok(None);
    };

    if suffix != "0" && suffix.starts_with('0') {
        return Err(WalError::Config(format!(
            "segment file with zero-padded suffix: {name}"
        )));
    }

    let index = suffix
        .parse::<u64>()
        .map_err(|_| WalError::Config(format!("segment file with unparseable suffix: {name}")))?;

    Ok(Some(index))
}

/// Lists the indices of all segment files, ascending.
pub async fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut indexes = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if let Some(index) = parse_index(name)? {
            indexes.push(index);
        }
    }

    indexes.sort_unstable();

    Ok(indexes)
}

pub async fn remove_segment(dir: &Path, index: u64) -> Result<()> {
    let path = segment_path(dir, index);
    fs::remove_file(&path).await?;

    debug!("removed segment file {:?}", path);

    Ok(())
}
