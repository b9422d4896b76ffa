//! Command implementations for the testmd CLI

pub mod check;
pub mod fmt;
pub mod list;

pub use check::check_command;
pub use fmt::fmt_command;
pub use list::list_command;

use anyhow::{Context, Result};
use std::path::Path;
use testmd::config::ACCEPTED_FILE_SUFFIX;
use testmd::PreviousResults;

/// Test group an accepted file belongs to, taken from its file name.
pub fn test_group_of(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    name.strip_suffix(ACCEPTED_FILE_SUFFIX)
        .unwrap_or(name)
        .to_string()
}

/// Read and parse an accepted file.
pub fn read_accepted(path: &Path) -> Result<(String, Vec<PreviousResults>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tests = testmd::store::reader::read(&test_group_of(path), &content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok((content, tests))
}
