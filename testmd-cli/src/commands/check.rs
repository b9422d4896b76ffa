//! Parse accepted files and summarize them

use anyhow::Result;
use colored::*;
use std::path::PathBuf;
use testmd::{ConsoleReporter, FileSummary, JsonReporter, Reporter};

use super::read_accepted;

pub fn check_command(files: &[PathBuf], json: bool, verbose: bool) -> Result<()> {
    let reporter: Box<dyn Reporter> = if json {
        Box::new(JsonReporter::new())
    } else {
        Box::new(ConsoleReporter::new(verbose))
    };

    let mut failures = 0;
    for file in files {
        match read_accepted(file) {
            Ok((_, tests)) => reporter.on_file(&FileSummary::new(file, &tests)),
            Err(e) => {
                failures += 1;
                eprintln!("{} {:#}", "Invalid:".red().bold(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} accepted files could not be parsed", failures, files.len());
    }
    if !json {
        println!("\n{}", format!("{} accepted files OK", files.len()).green().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_reports_parse_errors() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.accepted.md");
        let bad = temp_dir.path().join("bad.accepted.md");
        std::fs::write(&good, "# Test: \"t\" #\n\n**NO PERMUTATIONS**\n").unwrap();
        std::fs::write(&bad, "# Test: \"t\" #\n\nnot a valid line\n").unwrap();

        assert!(check_command(&[good.clone()], true, false).is_ok());
        assert!(check_command(&[good, bad], true, false).is_err());
    }
}
