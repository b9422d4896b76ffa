//! Parses accepted files back into results
//!
//! The reader is line oriented. Both layouts written by [`super::ResultsWriter`] are
//! accepted; anything unrecognized inside a test block is an error, since silently
//! dropping content would corrupt the skip/re-run decision of later runs.

use std::collections::{BTreeMap, BTreeSet};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::identity::{KeyHasher, Sha256Hasher};
use crate::result::{PermutationResult, PreviousResults, ResultKind};
use super::format::*;

struct Patterns {
    test_start: Regex,
    test_version: Regex,
    permutation_start: Regex,
    key_value: Regex,
    multi_line_key: Regex,
    result_detail: Regex,
    note_detail: Regex,
}

static PATTERNS: Lazy<Patterns> = Lazy::new(|| Patterns {
    test_start: pattern(r#"^# Test: "(.*)" #$"#),
    test_version: pattern(r#"^# Test Version: "(.*)" #$"#),
    permutation_start: pattern(r"^## Permutation (\S*) (.*) ##$"),
    key_value: pattern(r"^- \*\*([^*]*?):\*\*(?: (.*))?$"),
    multi_line_key: pattern(r"^- \*\*([^*]*) =>\*\*$"),
    result_detail: pattern(r"^\*\*(.*?)\*\*:(?: (.*))?$"),
    note_detail: pattern(r"^__(.*?)__:(?: (.*))?$"),
});

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|e| panic!("invalid built-in pattern {}: {}", source, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Definition,
    Notes,
    Results,
}

/// Permutation being assembled from consecutive lines
#[derive(Debug)]
struct PendingPermutation {
    stored_key: String,
    line: usize,
    verified: bool,
    message: Option<String>,
    parameters: BTreeMap<String, String>,
    notes: BTreeMap<String, String>,
    results: BTreeMap<String, String>,
}

impl PendingPermutation {
    fn new(stored_key: &str, line: usize, verified: bool, message: Option<String>) -> Self {
        Self {
            stored_key: stored_key.to_string(),
            line,
            verified,
            message,
            parameters: BTreeMap::new(),
            notes: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct MultiLineValue {
    key: String,
    section: Section,
    lines: Vec<String>,
    pending_blank_lines: usize,
}

impl MultiLineValue {
    fn push_line(&mut self, line: &str) {
        for _ in 0..self.pending_blank_lines {
            self.lines.push(String::new());
        }
        self.pending_blank_lines = 0;
        self.lines.push(line.to_string());
    }
}

/// Reads accepted files
pub struct ResultsReader<'h> {
    hasher: &'h dyn KeyHasher,
}

impl Default for ResultsReader<'static> {
    fn default() -> Self {
        Self {
            hasher: &Sha256Hasher,
        }
    }
}

impl<'h> ResultsReader<'h> {
    /// Reader that recomputes keys with the given hasher
    pub fn new(hasher: &'h dyn KeyHasher) -> Self {
        Self { hasher }
    }

    /// Parse the content of an accepted file for the given test group.
    pub fn read(&self, test_group: &str, content: &str) -> Result<Vec<PreviousResults>> {
        let mut state = ReaderState::new(test_group, self.hasher);
        let mut line_count = 0;

        for (index, line) in content.lines().enumerate() {
            line_count = index + 1;
            state.line(line_count, line)?;
        }

        state.finish(line_count)
    }
}

struct ReaderState<'a> {
    test_group: &'a str,
    hasher: &'a dyn KeyHasher,
    tests: Vec<PreviousResults>,
    current_test: Option<PreviousResults>,
    file_version: Option<String>,
    pending: Option<PendingPermutation>,
    common: BTreeMap<String, String>,
    section: Section,
    table_columns: Vec<String>,
    multi_line: Option<MultiLineValue>,
}

impl<'a> ReaderState<'a> {
    fn new(test_group: &'a str, hasher: &'a dyn KeyHasher) -> Self {
        Self {
            test_group,
            hasher,
            tests: Vec::new(),
            current_test: None,
            file_version: None,
            pending: None,
            common: BTreeMap::new(),
            section: Section::Definition,
            table_columns: Vec::new(),
            multi_line: None,
        }
    }

    fn line(&mut self, number: usize, line: &str) -> Result<()> {
        if self.multi_line.is_some() {
            if let Some(rest) = line.strip_prefix(INDENT) {
                if let Some(value) = self.multi_line.as_mut() {
                    value.push_line(rest);
                }
                return Ok(());
            }
            if line.trim().is_empty() {
                if let Some(value) = self.multi_line.as_mut() {
                    value.pending_blank_lines += 1;
                }
                return Ok(());
            }
            self.commit_multi_line(number)?;
        }

        if line.trim().is_empty() {
            return Ok(());
        }

        let patterns = &*PATTERNS;

        if let Some(captures) = patterns.test_start.captures(line) {
            self.finish_test()?;
            self.current_test = Some(PreviousResults::new(self.test_group, &captures[1]));
            return Ok(());
        }

        if let Some(captures) = patterns.test_version.captures(line) {
            let version = Some(captures[1].to_string());
            match self.current_test.as_mut() {
                Some(test) => test.set_source_hash(version),
                None => self.file_version = version,
            }
            return Ok(());
        }

        if self.current_test.is_none() {
            // File preamble, e.g. the generated-file warning
            return Ok(());
        }

        if line == NO_PERMUTATIONS {
            return Ok(());
        }

        if line == NOTES_HEADER || line == RESULTS_HEADER {
            if self.pending.is_none() {
                return Err(Error::parse(number, format!("\"{}\" outside of a permutation", line)));
            }
            self.section = if line == NOTES_HEADER {
                Section::Notes
            } else {
                Section::Results
            };
            return Ok(());
        }

        if let Some(captures) = patterns.permutation_start.captures(line) {
            self.save_pending()?;
            self.reset_block();

            let (verified, message) = parse_status(number, &captures[2])?;
            self.pending = Some(PendingPermutation::new(&captures[1], number, verified, message));
            return Ok(());
        }

        if line.starts_with(SEPARATOR) {
            self.save_pending()?;
            self.reset_block();
            return Ok(());
        }

        if let Some(captures) = patterns.multi_line_key.captures(line) {
            self.multi_line = Some(MultiLineValue {
                key: unescape_cell(&captures[1]),
                section: self.section,
                lines: Vec::new(),
                pending_blank_lines: 0,
            });
            return Ok(());
        }

        if let Some(captures) = patterns.key_value.captures(line) {
            let value = captures.get(2).map_or("", |m| m.as_str());
            let key = unescape_cell(&captures[1]);
            return self.assign(number, self.section, &key, value.to_string());
        }

        if line.starts_with('|') {
            return self.table_line(number, line);
        }

        Err(Error::parse(number, format!("unrecognized line \"{}\"", line)))
    }

    fn assign(&mut self, number: usize, section: Section, key: &str, value: String) -> Result<()> {
        match section {
            Section::Definition => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.parameters.insert(key.to_string(), value.clone());
                }
                self.common.insert(key.to_string(), value);
            }
            Section::Notes | Section::Results => {
                let pending = self.pending.as_mut().ok_or_else(|| {
                    Error::parse(number, format!("value for \"{}\" outside of a permutation", key))
                })?;
                let target = if section == Section::Notes {
                    &mut pending.notes
                } else {
                    &mut pending.results
                };
                target.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    fn commit_multi_line(&mut self, number: usize) -> Result<()> {
        if let Some(value) = self.multi_line.take() {
            let joined = value.lines.join("\n");
            self.assign(number, value.section, &value.key, joined)?;
        }
        Ok(())
    }

    fn table_line(&mut self, number: usize, line: &str) -> Result<()> {
        let cells: Vec<&str> = line[1..].split('|').map(str::trim).collect();

        if cells.first() == Some(&PERMUTATION_COLUMN) {
            if cells.len() < 3 {
                return Err(Error::parse(number, "table header is missing columns"));
            }
            self.table_columns = cells[2..cells.len() - 1]
                .iter()
                .map(|cell| unescape_cell(cell))
                .collect();
            return Ok(());
        }

        if line.starts_with("| :") {
            return Ok(());
        }

        let expected = self.table_columns.len() + 3;
        if cells.len() != expected {
            return Err(Error::parse(
                number,
                format!("expected {} table cells, found {}", expected, cells.len()),
            ));
        }

        if cells[1].is_empty() {
            if self.pending.is_none() {
                return Err(Error::parse(number, "continuation row without a permutation"));
            }
        } else {
            self.save_pending()?;

            let (verified, message) = parse_verified_cell(cells[1]);
            let mut pending = PendingPermutation::new(cells[0], number, verified, message);
            pending.parameters = self.common.clone();
            for (column, cell) in self.table_columns.iter().zip(&cells[2..cells.len() - 1]) {
                if !cell.is_empty() {
                    pending.parameters.insert(column.clone(), unescape_cell(cell));
                }
            }
            self.pending = Some(pending);
        }

        let details = cells[cells.len() - 1];
        if details.is_empty() {
            return Ok(());
        }

        let patterns = &*PATTERNS;
        let (section, captures) = if let Some(captures) = patterns.result_detail.captures(details) {
            (Section::Results, captures)
        } else if let Some(captures) = patterns.note_detail.captures(details) {
            (Section::Notes, captures)
        } else {
            return Err(Error::parse(number, format!("unknown details column format \"{}\"", details)));
        };

        let key = unescape_cell(&captures[1]);
        let value = unescape_cell(captures.get(2).map_or("", |m| m.as_str()));
        self.assign(number, section, &key, value)
    }

    /// Reset per-permutation state at a permutation header or separator.
    fn reset_block(&mut self) {
        self.common.clear();
        self.section = Section::Definition;
        self.table_columns.clear();
    }

    fn save_pending(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let Some(test) = self.current_test.as_mut() else {
            return Err(Error::parse(pending.line, "permutation outside of a test"));
        };

        let kind = if pending.verified {
            ResultKind::Verified
        } else {
            ResultKind::Unverified
        };
        let table_parameters: BTreeSet<String> = self.table_columns.iter().cloned().collect();
        let result = PermutationResult::new(kind, pending.parameters, table_parameters, self.hasher)
            .with_notes(pending.notes)
            .with_results(pending.results)
            .with_message(pending.message);

        if result.key() != pending.stored_key {
            warn!(
                "Permutation on line {} of test \"{}\" is stored as {} but its parameters hash to {}",
                pending.line,
                test.test_name(),
                pending.stored_key,
                result.key()
            );
        }

        if let Some(replaced) = test.add_result(result) {
            warn!(
                "Duplicate permutation {} in test \"{}\"; keeping the later entry",
                replaced.key(),
                test.test_name()
            );
        }
        Ok(())
    }

    fn finish_test(&mut self) -> Result<()> {
        self.save_pending()?;
        self.reset_block();
        if let Some(mut test) = self.current_test.take() {
            if test.source_hash().is_none() {
                test.set_source_hash(self.file_version.clone());
            }
            self.tests.push(test);
        }
        Ok(())
    }

    fn finish(mut self, last_line: usize) -> Result<Vec<PreviousResults>> {
        self.commit_multi_line(last_line)?;
        self.finish_test()?;
        Ok(self.tests)
    }
}

fn parse_status(number: usize, status: &str) -> Result<(bool, Option<String>)> {
    if status == VERIFIED_MARKER {
        return Ok((true, None));
    }

    let rest = status
        .strip_prefix(NOT_VERIFIED_MARKER)
        .ok_or_else(|| Error::parse(number, format!("unknown verification status \"{}\"", status)))?;

    if rest == "_" {
        return Ok((false, None));
    }

    let message = rest
        .strip_prefix(": ")
        .and_then(|m| m.strip_suffix('_'))
        .ok_or_else(|| Error::parse(number, format!("malformed verification status \"{}\"", status)))?;

    Ok((false, Some(unescape_cell(message))))
}

fn parse_verified_cell(cell: &str) -> (bool, Option<String>) {
    match cell {
        "true" => (true, None),
        "false" => (false, None),
        message => (false, Some(unescape_cell(message))),
    }
}

/// Parse with the default hasher.
pub fn read(test_group: &str, content: &str) -> Result<Vec<PreviousResults>> {
    ResultsReader::default().read(test_group, content)
}
