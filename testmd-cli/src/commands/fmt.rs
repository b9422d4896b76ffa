//! Rewrite accepted files in canonical form

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use testmd::ResultsWriter;

use super::read_accepted;

pub fn fmt_command(files: &[PathBuf], check: bool) -> Result<()> {
    let writer = ResultsWriter::new();
    let mut changed = Vec::new();

    for file in files {
        let (content, tests) = read_accepted(file)?;
        let rendered = writer.render(&tests);
        if rendered == content {
            continue;
        }

        if check {
            println!("{} {}", "Would reformat".yellow(), file.display());
        } else {
            testmd::store::persist(file, &rendered)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!("{} {}", "Reformatted".green(), file.display());
        }
        changed.push(file);
    }

    if check && !changed.is_empty() {
        anyhow::bail!("{} accepted files are not in canonical form", changed.len());
    }
    Ok(())
}
