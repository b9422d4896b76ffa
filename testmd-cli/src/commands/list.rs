//! List the permutations of an accepted file

use anyhow::Result;
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use testmd::{PermutationResult, PreviousResults};

use super::read_accepted;

#[derive(Debug, Serialize)]
struct PermutationEntry<'a> {
    test: &'a str,
    key: &'a str,
    verified: bool,
    message: Option<&'a str>,
    parameters: &'a BTreeMap<String, String>,
}

impl<'a> PermutationEntry<'a> {
    fn new(test: &'a PreviousResults, result: &'a PermutationResult) -> Self {
        Self {
            test: test.test_name(),
            key: result.key(),
            verified: result.is_verified(),
            message: result.not_verified_message(),
            parameters: result.parameters(),
        }
    }
}

pub fn list_command(file: &Path, test: Option<&str>, json: bool) -> Result<()> {
    let (_, tests) = read_accepted(file)?;
    let selected: Vec<&PreviousResults> = tests
        .iter()
        .filter(|t| test.map_or(true, |name| t.test_name() == name))
        .collect();

    if let Some(name) = test {
        if selected.is_empty() {
            anyhow::bail!("No test named \"{}\" in {}", name, file.display());
        }
    }

    if json {
        let entries: Vec<PermutationEntry> = selected
            .iter()
            .flat_map(|t| t.sorted_results().into_iter().map(move |r| PermutationEntry::new(t, r)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for test in selected {
        println!("{}", test.test_name().bold());
        for result in test.sorted_results() {
            let status = if result.is_verified() {
                "verified".green()
            } else {
                match result.not_verified_message() {
                    Some(message) => format!("not verified: {}", message).yellow(),
                    None => "not verified".yellow(),
                }
            };
            let parameters: Vec<String> = result
                .parameters()
                .iter()
                .map(|(key, value)| format!("{}={}", key, value.replace('\n', "\\n")))
                .collect();
            println!("  {} {} [{}]", result.key().cyan(), status, parameters.join(", "));
        }
    }
    Ok(())
}
