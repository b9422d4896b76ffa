//! Results of a permutation run, either produced by this run or read back from an
//! accepted file
//!
//! Everything is stored sorted and already serialized so results are written in a stable
//! order and compare field-by-field.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use serde::Serialize;

use crate::identity::{compute_key, compute_table_key, KeyHasher};

/// Outcome of a permutation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// Verification passed, or results were unchanged since a verified run
    Verified,
    /// Valid, but not checked in this run
    Unverified,
    /// The permutation does not apply
    Invalid,
    /// Verification failed; blocks saving the test's results
    Failed,
}

impl ResultKind {
    pub fn is_valid(self) -> bool {
        self != ResultKind::Invalid
    }

    pub fn is_verified(self) -> bool {
        self == ResultKind::Verified
    }

    pub fn is_savable(self) -> bool {
        self != ResultKind::Failed
    }
}

/// A permutation's result in its persisted (string) form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermutationResult {
    kind: ResultKind,
    parameters: BTreeMap<String, String>,
    table_parameters: BTreeSet<String>,
    results: BTreeMap<String, String>,
    notes: BTreeMap<String, String>,
    key: String,
    table_key: String,
    not_verified_message: Option<String>,
}

impl PermutationResult {
    /// Create a result and compute its keys from the given parameters.
    pub fn new(
        kind: ResultKind,
        parameters: BTreeMap<String, String>,
        table_parameters: BTreeSet<String>,
        hasher: &dyn KeyHasher,
    ) -> Self {
        let key = compute_key(&parameters, hasher);
        let table_key = compute_table_key(&parameters, &table_parameters, hasher);

        Self {
            kind,
            parameters,
            table_parameters,
            results: BTreeMap::new(),
            notes: BTreeMap::new(),
            key,
            table_key,
            not_verified_message: None,
        }
    }

    pub fn with_results(mut self, results: BTreeMap<String, String>) -> Self {
        self.results = results;
        self
    }

    pub fn with_notes(mut self, notes: BTreeMap<String, String>) -> Self {
        self.notes = notes;
        self
    }

    /// Attach the reason the permutation was not verified. Blank messages are dropped.
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.not_verified_message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn table_parameters(&self) -> &BTreeSet<String> {
        &self.table_parameters
    }

    pub fn results(&self) -> &BTreeMap<String, String> {
        &self.results
    }

    pub fn notes(&self) -> &BTreeMap<String, String> {
        &self.notes
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn table_key(&self) -> &str {
        &self.table_key
    }

    pub fn not_verified_message(&self) -> Option<&str> {
        self.not_verified_message.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.kind.is_valid()
    }

    pub fn is_verified(&self) -> bool {
        self.kind.is_verified()
    }

    pub fn is_savable(&self) -> bool {
        self.kind.is_savable()
    }

    /// Results are ordered by table, then by key.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.table_key, &self.key)
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Accepted results of one test, as loaded from or written to an accepted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousResults {
    test_group: String,
    test_name: String,
    source_hash: Option<String>,
    results: BTreeMap<String, PermutationResult>,
}

impl PreviousResults {
    pub fn new(test_group: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            test_group: test_group.into(),
            test_name: test_name.into(),
            source_hash: None,
            results: BTreeMap::new(),
        }
    }

    pub fn with_source_hash(mut self, source_hash: Option<String>) -> Self {
        self.source_hash = source_hash;
        self
    }

    pub fn set_source_hash(&mut self, source_hash: Option<String>) {
        self.source_hash = source_hash;
    }

    pub fn test_group(&self) -> &str {
        &self.test_group
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn source_hash(&self) -> Option<&str> {
        self.source_hash.as_deref()
    }

    /// Add a result, returning any result previously stored under the same key.
    pub fn add_result(&mut self, result: PermutationResult) -> Option<PermutationResult> {
        self.results.insert(result.key().to_string(), result)
    }

    pub fn get(&self, key: &str) -> Option<&PermutationResult> {
        self.results.get(key)
    }

    pub fn keys(&self) -> BTreeSet<&str> {
        self.results.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in `(table_key, key)` order.
    pub fn sorted_results(&self) -> Vec<&PermutationResult> {
        let mut results: Vec<&PermutationResult> = self.results.values().collect();
        results.sort_by(|a, b| a.compare(b));
        results
    }
}
