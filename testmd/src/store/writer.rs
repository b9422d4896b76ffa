//! Renders accepted results as markdown
//!
//! Output only depends on the results themselves: tests are ordered by name and
//! permutations by `(table_key, key)`, so re-running unchanged tests produces a
//! byte-identical file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::result::{PermutationResult, PreviousResults};
use super::format::*;

/// Writes accepted files
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultsWriter;

impl ResultsWriter {
    pub fn new() -> Self {
        Self
    }

    /// Render the given tests and persist them to `location`, replacing the file atomically.
    pub fn write<'a>(
        &self,
        location: &Path,
        tests: impl IntoIterator<Item = &'a PreviousResults>,
    ) -> Result<()> {
        debug!("Writing results to {}", location.display());
        let content = self.render(tests);
        super::persist(location, &content)
    }

    /// Render the complete file content.
    pub fn render<'a>(&self, tests: impl IntoIterator<Item = &'a PreviousResults>) -> String {
        let mut tests: Vec<&PreviousResults> = tests.into_iter().collect();
        tests.sort_by(|a, b| a.test_name().cmp(b.test_name()));

        let mut out = String::new();
        out.push_str(WARNING);
        out.push('\n');

        for test in tests {
            out.push_str(&format!("\n# Test: \"{}\" #\n\n", test.test_name()));
            if let Some(hash) = test.source_hash() {
                out.push_str(&format!("# Test Version: \"{}\" #\n\n", hash));
            }

            // Invalid permutations are re-evaluated every run and never written
            let results: Vec<&PermutationResult> = test
                .sorted_results()
                .into_iter()
                .filter(|result| result.is_valid())
                .collect();

            if results.is_empty() {
                out.push_str(NO_PERMUTATIONS);
                out.push('\n');
                continue;
            }

            let (flat, tabular): (Vec<&PermutationResult>, Vec<&PermutationResult>) = results
                .into_iter()
                .partition(|result| result.table_parameters().is_empty());

            let mut blocks: Vec<String> = flat.into_iter().map(render_permutation).collect();
            blocks.extend(table_groups(tabular).into_iter().map(|rows| render_table(&rows)));
            let separator = format!("\n{}\n\n", SEPARATOR);
            out.push_str(&blocks.join(separator.as_str()));
        }

        out
    }
}

/// Rows sharing both their table columns and their description form one table.
fn table_groups(results: Vec<&PermutationResult>) -> Vec<Vec<&PermutationResult>> {
    let mut tables: BTreeMap<(&str, &BTreeSet<String>, BTreeMap<&str, &str>), Vec<&PermutationResult>> =
        BTreeMap::new();
    for result in results {
        let description = description(result).collect();
        tables
            .entry((result.table_key(), result.table_parameters(), description))
            .or_default()
            .push(result);
    }
    tables.into_values().collect()
}

fn description<'a>(result: &'a PermutationResult) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    result
        .parameters()
        .iter()
        .filter(|(key, _)| !result.table_parameters().contains(*key))
        .map(|(key, value)| (key.as_str(), value.as_str()))
}

fn status_label(result: &PermutationResult) -> String {
    if result.is_verified() {
        return VERIFIED_MARKER.to_string();
    }
    match result.not_verified_message() {
        Some(message) => format!("{}: {}_", NOT_VERIFIED_MARKER, escape_cell(message)),
        None => format!("{}_", NOT_VERIFIED_MARKER),
    }
}

fn push_entry(out: &mut String, key: &str, value: &str) {
    if value.contains('\n') {
        out.push_str(&format!("- **{} =>**\n", escape_key(key)));
        for line in value.split('\n') {
            out.push_str(INDENT);
            out.push_str(line);
            out.push('\n');
        }
    } else {
        out.push_str(&format!("- **{}:** {}\n", escape_key(key), value));
    }
}

fn render_permutation(result: &PermutationResult) -> String {
    let mut out = format!("## Permutation {} {} ##\n\n", result.key(), status_label(result));

    for (key, value) in result.parameters() {
        push_entry(&mut out, key, value);
    }

    if !result.notes().is_empty() {
        out.push('\n');
        out.push_str(NOTES_HEADER);
        out.push_str("\n\n");
        for (key, value) in result.notes() {
            push_entry(&mut out, key, value);
        }
    }

    if !result.results().is_empty() {
        out.push('\n');
        out.push_str(RESULTS_HEADER);
        out.push_str("\n\n");
        for (key, value) in result.results() {
            push_entry(&mut out, key, value);
        }
    }
    out
}

fn pad(value: &str, width: usize) -> String {
    format!("{:<width$}", value, width = width)
}

fn verified_cell(result: &PermutationResult) -> String {
    match result.not_verified_message() {
        Some(message) if !result.is_verified() => escape_verified_message(message),
        _ => result.is_verified().to_string(),
    }
}

fn render_table(rows: &[&PermutationResult]) -> String {
    let mut out = String::new();
    let Some(first) = rows.first() else {
        return out;
    };

    let mut has_description = false;
    for (key, value) in description(first) {
        push_entry(&mut out, key, value);
        has_description = true;
    }
    if has_description {
        out.push('\n');
    }

    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.table_parameters().iter().map(String::as_str))
        .collect();

    let key_width = rows
        .iter()
        .map(|row| row.key().chars().count())
        .fold(PERMUTATION_COLUMN.len(), usize::max);

    let verified_cells: Vec<String> = rows.iter().map(|row| verified_cell(row)).collect();
    let verified_width = verified_cells
        .iter()
        .map(|cell| cell.chars().count())
        .fold(VERIFIED_COLUMN.len(), usize::max);

    let column_cells: Vec<(String, usize, Vec<String>)> = columns
        .iter()
        .map(|column| {
            let cells: Vec<String> = rows
                .iter()
                .map(|row| {
                    row.parameters()
                        .get(*column)
                        .map(|value| escape_cell(value))
                        .unwrap_or_default()
                })
                .collect();
            let name = escape_cell(column);
            let width = cells
                .iter()
                .map(|cell| cell.chars().count())
                .fold(name.chars().count(), usize::max);
            (name, width, cells)
        })
        .collect();

    let mut header = format!(
        "| {} | {} |",
        pad(PERMUTATION_COLUMN, key_width),
        pad(VERIFIED_COLUMN, verified_width)
    );
    let mut alignment = format!(
        "| :{} | :{} |",
        "-".repeat(key_width.saturating_sub(1)),
        "-".repeat(verified_width.saturating_sub(1))
    );
    for (name, width, _) in &column_cells {
        header.push_str(&format!(" {} |", pad(name, *width)));
        alignment.push_str(&format!(" :{} |", "-".repeat(width.saturating_sub(1))));
    }
    out.push_str(&header);
    out.push_str(&format!(" {}\n", DETAILS_COLUMN));
    out.push_str(&alignment);
    out.push_str(" :------\n");

    let blank_prefix = {
        let mut prefix = format!("| {} | {} |", pad("", key_width), pad("", verified_width));
        for (_, width, _) in &column_cells {
            prefix.push_str(&format!(" {} |", pad("", *width)));
        }
        prefix
    };

    for (row_index, row) in rows.iter().enumerate() {
        let mut line = format!(
            "| {} | {} |",
            pad(row.key(), key_width),
            pad(&verified_cells[row_index], verified_width)
        );
        for (_, width, cells) in &column_cells {
            line.push_str(&format!(" {} |", pad(&cells[row_index], *width)));
        }

        let details: Vec<String> = row
            .notes()
            .iter()
            .map(|(key, value)| format!(" __{}__: {}", escape_key(key), escape_cell(value)))
            .chain(
                row.results()
                    .iter()
                    .map(|(key, value)| format!(" **{}**: {}", escape_key(key), escape_cell(value))),
            )
            .collect();

        match details.split_first() {
            None => {
                out.push_str(&line);
                out.push('\n');
            }
            Some((first_detail, rest)) => {
                out.push_str(&line);
                out.push_str(first_detail);
                out.push('\n');
                for detail in rest {
                    out.push_str(&blank_prefix);
                    out.push_str(detail);
                    out.push('\n');
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Sha256Hasher;
    use crate::result::ResultKind;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn result(
        kind: ResultKind,
        parameters: &[(&str, &str)],
        table: &[&str],
        results: &[(&str, &str)],
    ) -> PermutationResult {
        PermutationResult::new(
            kind,
            map(parameters),
            table.iter().map(|c| c.to_string()).collect(),
            &Sha256Hasher,
        )
        .with_results(map(results))
    }

    #[test]
    fn test_render_flat() {
        let mut test = PreviousResults::new("group", "numbers").with_source_hash(Some("abc123".into()));
        let verified = result(ResultKind::Verified, &[("number", "1")], &[], &[("multiple", "63")]);
        let key = verified.key().to_string();
        test.add_result(verified);

        let rendered = ResultsWriter::new().render([&test]);
        let expected = format!(
            "{}\n\n# Test: \"numbers\" #\n\n# Test Version: \"abc123\" #\n\n## Permutation {} (verified) ##\n\n- **number:** 1\n\n#### Results ####\n\n- **multiple:** 63\n",
            WARNING, key
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_not_verified_and_multiline() {
        let mut test = PreviousResults::new("group", "sql");
        test.add_result(
            result(ResultKind::Unverified, &[("table", "t")], &[], &[("sql", "select *\nfrom t")])
                .with_message(Some("no database".into())),
        );

        let rendered = ResultsWriter::new().render([&test]);
        assert!(rendered.contains("_NOT VERIFIED: no database_ ##"));
        assert!(rendered.contains("- **sql =>**\n    select *\n    from t\n"));
    }

    #[test]
    fn test_invalid_results_are_not_written() {
        let mut test = PreviousResults::new("group", "skipped");
        test.add_result(result(ResultKind::Invalid, &[("a", "1")], &[], &[]));

        let rendered = ResultsWriter::new().render([&test]);
        assert!(rendered.contains(NO_PERMUTATIONS));
        assert!(!rendered.contains("## Permutation"));
    }

    #[test]
    fn test_render_table() {
        let mut test = PreviousResults::new("group", "table");
        test.add_result(result(
            ResultKind::Verified,
            &[("number", "11"), ("weight", "0.4")],
            &["number"],
            &[("weighted", "4.4")],
        ));
        test.add_result(result(
            ResultKind::Verified,
            &[("number", "20"), ("weight", "0.4")],
            &["number"],
            &[("weighted", "8")],
        ));

        let rendered = ResultsWriter::new().render([&test]);
        assert!(rendered.contains("- **weight:** 0.4\n\n| Permutation | Verified | number | RESULTS\n"));
        assert!(rendered.contains("| :---------- | :------- | :----- | :------\n"));
        assert_eq!(rendered.matches("| true     | ").count(), 2);
        assert!(!rendered.contains(SEPARATOR));
    }

    #[test]
    fn test_flat_results_are_not_merged_into_tables() {
        let mut test = PreviousResults::new("group", "mixed");
        for n in ["1", "2"] {
            test.add_result(result(ResultKind::Verified, &[("number", n)], &["number"], &[]));
            test.add_result(result(ResultKind::Verified, &[("x", n)], &[], &[]));
        }

        let rendered = ResultsWriter::new().render([&test]);
        assert_eq!(rendered.matches("## Permutation").count(), 2);
        assert_eq!(rendered.matches("| Permutation |").count(), 1);
        assert!(rendered.contains("- **x:** 1\n"));
        assert!(rendered.contains("- **x:** 2\n"));
        assert_eq!(rendered.matches(SEPARATOR).count(), 2);
    }

    #[test]
    fn test_tables_split_by_description() {
        let mut test = PreviousResults::new("group", "weights");
        test.add_result(result(ResultKind::Verified, &[("n", "1"), ("w", "0.3")], &["n"], &[]));
        test.add_result(result(ResultKind::Verified, &[("n", "1"), ("w", "0.4")], &["n"], &[]));

        let rendered = ResultsWriter::new().render([&test]);
        assert_eq!(rendered.matches("| Permutation |").count(), 2);
        assert!(rendered.contains("- **w:** 0.3\n"));
        assert!(rendered.contains("- **w:** 0.4\n"));
    }

    #[test]
    fn test_status_word_message_is_escaped() {
        let mut test = PreviousResults::new("group", "t");
        test.add_result(
            result(ResultKind::Unverified, &[("n", "1")], &["n"], &[]).with_message(Some("true".into())),
        );

        let rendered = ResultsWriter::new().render([&test]);
        assert!(rendered.contains("| &#116;rue "));
        assert!(!rendered.contains("| true "));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut a = PreviousResults::new("group", "b_test");
        let mut b = PreviousResults::new("group", "a_test");
        a.add_result(result(ResultKind::Verified, &[("x", "1")], &[], &[]));
        a.add_result(result(ResultKind::Verified, &[("x", "2")], &[], &[]));
        b.add_result(result(ResultKind::Verified, &[("y", "1")], &[], &[]));

        let writer = ResultsWriter::new();
        let first = writer.render([&a, &b]);
        let second = writer.render([&b, &a]);
        assert_eq!(first, second);
        assert!(first.find("a_test").unwrap() < first.find("b_test").unwrap());
    }
}
