//! Summaries of permutation runs and accepted files
//!
//! Reporters print what a flush did, or what an accepted file contains.

use std::path::PathBuf;
use colored::Colorize;
use serde::Serialize;
use tracing::error;

use crate::result::{PreviousResults, ResultKind};

/// Counts of permutation outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub verified: usize,
    pub unverified: usize,
    pub invalid: usize,
    pub failed: usize,
    /// Verified permutations whose previous result was reused
    pub unchanged: usize,
}

impl RunStats {
    pub fn record(&mut self, kind: ResultKind, ran: bool) {
        self.total += 1;
        match kind {
            ResultKind::Verified => {
                self.verified += 1;
                if !ran {
                    self.unchanged += 1;
                }
            }
            ResultKind::Unverified => self.unverified += 1,
            ResultKind::Invalid => self.invalid += 1,
            ResultKind::Failed => self.failed += 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Percentage of permutations that did not need to run
    pub fn reuse_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.unchanged as f64) / (self.total as f64) * 100.0
        }
    }
}

/// What a flush did with each test of a group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub test_group: String,
    pub location: PathBuf,

    /// Whether the accepted file was (re)written
    pub written: bool,

    /// Tests whose results replaced the accepted ones
    pub saved: Vec<String>,

    /// Tests with a failed permutation; their accepted results were kept
    pub dropped: Vec<String>,

    /// Tests that did not run and were kept
    pub retained: Vec<String>,

    /// Tests that did not run and were removed from the file
    pub removed: Vec<String>,

    pub stats: RunStats,
}

impl FlushReport {
    pub fn is_success(&self) -> bool {
        self.dropped.is_empty() && self.stats.is_success()
    }
}

/// Per-test summary of an accepted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub test_name: String,
    pub source_hash: Option<String>,
    pub permutations: usize,
    pub verified: usize,
    pub unverified: usize,
    pub tabular: bool,
}

impl TestSummary {
    pub fn of(test: &PreviousResults) -> Self {
        let results = test.sorted_results();
        let verified = results.iter().filter(|r| r.is_verified()).count();
        Self {
            test_name: test.test_name().to_string(),
            source_hash: test.source_hash().map(str::to_string),
            permutations: results.len(),
            verified,
            unverified: results.len() - verified,
            tabular: results.iter().any(|r| !r.table_parameters().is_empty()),
        }
    }
}

/// Summary of one accepted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub location: PathBuf,
    pub tests: Vec<TestSummary>,
}

impl FileSummary {
    pub fn new(location: impl Into<PathBuf>, tests: &[PreviousResults]) -> Self {
        let mut tests: Vec<TestSummary> = tests.iter().map(TestSummary::of).collect();
        tests.sort_by(|a, b| a.test_name.cmp(&b.test_name));
        Self {
            location: location.into(),
            tests,
        }
    }

    pub fn permutations(&self) -> usize {
        self.tests.iter().map(|t| t.permutations).sum()
    }
}

/// Reporter trait
pub trait Reporter {
    /// Called after a test manager flushed its results
    fn on_flush(&self, report: &FlushReport);

    /// Called for each inspected accepted file
    fn on_file(&self, summary: &FileSummary);
}

/// Console reporter
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn print_names(label: colored::ColoredString, names: &[String]) {
        if !names.is_empty() {
            println!("  {}: {}", label, names.join(", "));
        }
    }
}

impl Reporter for ConsoleReporter {
    fn on_flush(&self, report: &FlushReport) {
        println!("\n{} {}", "Test group".bold(), report.test_group);

        let stats = &report.stats;
        if stats.verified > 0 {
            println!(
                "  {} verified ({} unchanged, {:.1}% reused)",
                stats.verified.to_string().green(),
                stats.unchanged,
                stats.reuse_rate()
            );
        }
        if stats.unverified > 0 {
            println!("  {} not verified", stats.unverified.to_string().yellow());
        }
        if stats.invalid > 0 {
            println!("  {} invalid", stats.invalid.to_string().dimmed());
        }
        if stats.failed > 0 {
            println!("  {} failed", stats.failed.to_string().red());
        }

        if self.verbose {
            Self::print_names("saved".green(), &report.saved);
            Self::print_names("retained".cyan(), &report.retained);
        }
        Self::print_names("not saved".red(), &report.dropped);
        Self::print_names("removed".yellow(), &report.removed);

        if report.written {
            println!("  Wrote {}", report.location.display());
        } else if self.verbose {
            println!("  {} {}", "Unchanged".dimmed(), report.location.display());
        }
    }

    fn on_file(&self, summary: &FileSummary) {
        println!(
            "{} {} ({} tests, {} permutations)",
            "File".bold(),
            summary.location.display(),
            summary.tests.len(),
            summary.permutations()
        );

        for test in &summary.tests {
            let status = if test.unverified == 0 {
                format!("{} verified", test.verified).green()
            } else {
                format!("{} verified, {} not verified", test.verified, test.unverified).yellow()
            };
            println!("  {} ... {}", test.test_name, status);

            if self.verbose {
                if let Some(hash) = &test.source_hash {
                    println!("    version: {}", hash.dimmed());
                }
                if test.tabular {
                    println!("    {}", "tabular".dimmed());
                }
            }
        }
    }
}

/// JSON reporter
#[derive(Debug, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    fn print(value: &impl Serialize) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Could not serialize report: {}", e),
        }
    }
}

impl Reporter for JsonReporter {
    fn on_flush(&self, report: &FlushReport) {
        Self::print(report);
    }

    fn on_file(&self, summary: &FileSummary) {
        Self::print(summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Sha256Hasher;
    use crate::result::PermutationResult;

    #[test]
    fn test_run_stats() {
        let mut stats = RunStats::default();
        stats.record(ResultKind::Verified, true);
        stats.record(ResultKind::Verified, false);
        stats.record(ResultKind::Unverified, true);
        stats.record(ResultKind::Invalid, true);

        assert_eq!(stats.total, 4);
        assert_eq!(stats.verified, 2);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.reuse_rate(), 25.0);
        assert!(stats.is_success());

        stats.record(ResultKind::Failed, true);
        assert!(!stats.is_success());
    }

    #[test]
    fn test_file_summary() {
        let mut test = PreviousResults::new("group", "numbers");
        for (n, kind) in [("1", ResultKind::Verified), ("2", ResultKind::Unverified)] {
            let parameters = [("number".to_string(), n.to_string())].into_iter().collect();
            test.add_result(PermutationResult::new(kind, parameters, Default::default(), &Sha256Hasher));
        }

        let summary = FileSummary::new("numbers.accepted.md", &[test]);
        assert_eq!(summary.permutations(), 2);
        assert_eq!(summary.tests[0].verified, 1);
        assert_eq!(summary.tests[0].unverified, 1);
        assert!(!summary.tests[0].tabular);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["tests"][0]["test_name"], "numbers");
    }

    #[test]
    fn test_reporters_print_flush_reports() {
        let mut stats = RunStats::default();
        stats.record(ResultKind::Verified, false);
        stats.record(ResultKind::Failed, true);
        let report = FlushReport {
            test_group: "group".to_string(),
            location: PathBuf::from("group.accepted.md"),
            written: true,
            saved: vec!["good".to_string()],
            dropped: vec!["bad".to_string()],
            stats,
            ..FlushReport::default()
        };
        assert!(!report.is_success());

        let reporters: Vec<Box<dyn Reporter>> =
            vec![Box::new(ConsoleReporter::new(true)), Box::new(JsonReporter::new())];
        for reporter in &reporters {
            reporter.on_flush(&report);
        }

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["dropped"][0], "bad");
        assert_eq!(json["stats"]["unchanged"], 1);
    }
}
