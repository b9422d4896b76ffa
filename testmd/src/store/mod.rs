//! Accepted-file storage
//!
//! One markdown file per test group holds the accepted results of every test in it.

pub mod format;
pub mod reader;
pub mod writer;

use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::KeyHasher;
use crate::result::PreviousResults;

pub use reader::ResultsReader;
pub use writer::ResultsWriter;

/// Load the accepted results stored at `location`. A missing file has no results.
pub fn load(location: &Path, test_group: &str, hasher: &dyn KeyHasher) -> Result<Vec<PreviousResults>> {
    if !location.exists() {
        debug!("No accepted results at {}", location.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(location).map_err(|e| Error::io(location, e))?;
    ResultsReader::new(hasher).read(test_group, &content)
}

/// Replace the file at `location` with `content`.
///
/// The content is written to a temporary file in the same directory first, so readers
/// never observe a partially written file.
pub fn persist(location: &Path, content: &str) -> Result<()> {
    let parent = match location.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let mut file = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| Error::io(file.path(), e))?;
    file.persist(location)
        .map_err(|e| Error::io(location, e.error))?;
    Ok(())
}
