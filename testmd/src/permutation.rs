//! Permutation builder
//!
//! ```no_run
//! use testmd::{TestManager, SetupResult};
//!
//! # fn main() -> testmd::Result<()> {
//! let mut manager = TestManager::open("tests/accepted/math.accepted.md", "math")?;
//! let mut test = manager.test("multiply");
//! for number in [1, 2, 3] {
//!     test.permutation()
//!         .add_parameter("number", number)
//!         .add_result("product", number * 21)
//!         .setup(|| Ok(SetupResult::Ok))
//!         .run(|| {
//!             assert_eq!(number * 21 / 21, number);
//!             Ok(())
//!         })?;
//! }
//! manager.close()?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identity::{compute_key, compute_table_key, KeyHasher};
use crate::lifecycle::{
    decide, describe, join_entries, warn_once, CleanupFn, Decision, ForceReason, Lifecycle,
    SetupFn, SetupResult,
};
use crate::manager::TestManager;
use crate::result::{PermutationResult, ResultKind};
use crate::value::Value;

/// Parameter-name suffix declaring the parameter a table column
pub const AS_TABLE_SUFFIX: &str = "_asTable";

/// Creates permutations of one test
pub struct TestBuilder<'m> {
    manager: &'m mut TestManager,
    test_name: String,
    force_run: bool,
}

impl<'m> TestBuilder<'m> {
    pub(crate) fn new(manager: &'m mut TestManager, test_name: &str) -> Self {
        Self {
            manager,
            test_name: test_name.to_string(),
            force_run: false,
        }
    }

    /// Run every permutation of this test, ignoring previous results.
    pub fn force_run(mut self) -> Self {
        self.force_run = true;
        self
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn permutation(&mut self) -> Permutation<'_> {
        Permutation {
            manager: &mut *self.manager,
            test_name: &self.test_name,
            parameters: BTreeMap::new(),
            table_columns: BTreeSet::new(),
            results: BTreeMap::new(),
            notes: BTreeMap::new(),
            setup: None,
            cleanup: None,
            force_run: self.force_run,
        }
    }
}

/// A single parameterized case of a test
pub struct Permutation<'a> {
    manager: &'a mut TestManager,
    test_name: &'a str,
    parameters: BTreeMap<String, Value>,
    table_columns: BTreeSet<String>,
    results: BTreeMap<String, Value>,
    notes: BTreeMap<String, Value>,
    setup: Option<SetupFn<'a>>,
    cleanup: Option<CleanupFn<'a>>,
    force_run: bool,
}

impl<'a> Permutation<'a> {
    /// Add a parameter identifying this permutation.
    ///
    /// Absent values (null, empty collections) are ignored. A key ending in `_asTable`
    /// is stored without the suffix and shown as a table column.
    pub fn add_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_absent() || value.canonical().trim().is_empty() {
            return self;
        }

        let mut key = key.into();
        if let Some(column) = key.strip_suffix(AS_TABLE_SUFFIX) {
            key = column.to_string();
            self.table_columns.insert(key.clone());
        }
        self.parameters.insert(key, value);
        self
    }

    pub fn add_parameters<K, V>(self, parameters: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        parameters
            .into_iter()
            .fold(self, |permutation, (key, value)| permutation.add_parameter(key, value))
    }

    /// Store the given parameters as table columns rather than as separate entries.
    pub fn as_table<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.table_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add a note. Notes are stored for reference but never compared.
    pub fn add_note(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.notes.insert(key.into(), value.into());
        self
    }

    /// Add an observable result. Results are compared against the previous verified run.
    pub fn add_result(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.results.insert(key.into(), value.into());
        self
    }

    pub fn add_results<K, V>(self, results: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        results
            .into_iter()
            .fold(self, |permutation, (key, value)| permutation.add_result(key, value))
    }

    pub fn setup(mut self, setup: impl FnOnce() -> anyhow::Result<SetupResult> + 'a) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    /// Cleanup runs once whenever setup was entered, even if verification failed.
    pub fn cleanup(mut self, cleanup: impl FnOnce() -> anyhow::Result<()> + 'a) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Verify this permutation even if its results are unchanged.
    pub fn force_run(mut self) -> Self {
        self.force_run = true;
        self
    }

    pub fn key(&self) -> String {
        compute_key(&self.parameter_strings(), self.manager.hasher())
    }

    pub fn table_key(&self) -> String {
        compute_table_key(&self.parameter_strings(), &self.table_columns, self.manager.hasher())
    }

    fn parameter_strings(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.canonical()))
            .collect()
    }

    /// Run the permutation and record its result with the manager.
    ///
    /// Verification is skipped when a verified previous result has exactly the same
    /// results. A verification error or panic is recorded as failed before it is
    /// returned or resumed.
    pub fn run(self, verification: impl FnOnce() -> anyhow::Result<()>) -> Result<ResultKind> {
        let parameters = self.parameter_strings();
        let Permutation {
            manager,
            test_name,
            table_columns,
            results,
            notes,
            setup,
            cleanup,
            force_run,
            ..
        } = self;

        let results = serialized(&results);
        let notes = serialized(&notes);
        let build = |kind: ResultKind, hasher: &dyn KeyHasher| {
            PermutationResult::new(kind, parameters.clone(), table_columns.clone(), hasher)
                .with_notes(notes.clone())
                .with_results(results.clone())
        };

        if parameters.is_empty() {
            let failed = build(ResultKind::Failed, manager.hasher());
            manager.record(test_name, failed, false);
            return Err(Error::configuration(format!(
                "Permutation of test \"{}\" has no parameters",
                test_name
            )));
        }

        let key = compute_key(&parameters, manager.hasher());
        if let Some(existing) = manager.find_duplicate(test_name, &key) {
            let reason = if existing.parameters() == &parameters {
                "identical parameters"
            } else {
                "hash collision"
            };
            let error = Error::DuplicateKey {
                test_name: test_name.to_string(),
                permutation: format!("[{}]", join_entries(&parameters)),
                existing: format!("[{}]", join_entries(existing.parameters())),
                reason,
            };
            let failed = build(ResultKind::Failed, manager.hasher());
            manager.record(test_name, failed, false);
            return Err(error);
        }

        debug!(
            "----- Running test \"{}\", permutation [{}] -----",
            test_name,
            join_entries(&parameters)
        );

        let force = if force_run {
            warn_once(&format!("Forcing execution of test \"{}\"", test_name));
            Some(ForceReason::Permutation)
        } else if manager.config().force_rerun {
            warn_once("Forcing execution of all permutations: force_rerun is enabled");
            Some(ForceReason::Config)
        } else if manager.source_changed(test_name) {
            warn_once(&format!(
                "Forcing execution of all permutations of test \"{}\" in {} due to a source change",
                test_name,
                manager.test_group()
            ));
            Some(ForceReason::SourceChanged)
        } else {
            None
        };

        let previous = manager.previous_result(test_name, &key);
        if decide(previous, &results, force) == Decision::Skip {
            let verified = build(ResultKind::Verified, manager.hasher());
            manager.record(test_name, verified, false);
            return Ok(ResultKind::Verified);
        }

        let outcome = Lifecycle::new(describe(&parameters, &notes, &results))
            .with_setup(setup)
            .with_cleanup(cleanup)
            .execute(verification);

        let result = build(outcome.kind, manager.hasher()).with_message(outcome.message);
        manager.record(test_name, result, true);

        match outcome.failure {
            Some(failure) => failure.into_result(),
            None => Ok(outcome.kind),
        }
    }
}

/// Serialized form of notes or results. Null values have no stored form and are dropped.
fn serialized(values: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.serialize().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::CannotVerify;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> TestManager {
        TestManager::new(temp_dir.path().join("p.accepted.md"), "p", Config::default())
    }

    #[test]
    fn test_key_ignores_insertion_order_and_absent_values() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);
        let mut test = manager.test("t");

        let first = test
            .permutation()
            .add_parameter("a", 1)
            .add_parameter("b", vec![3, 1, 2])
            .key();
        let second = test
            .permutation()
            .add_parameter("b", vec![1, 2, 3])
            .add_parameter("missing", Option::<i32>::None)
            .add_parameter("empty", Vec::<i32>::new())
            .add_parameter("a", 1)
            .key();

        assert_eq!(first, second);
    }

    #[test]
    fn test_as_table_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);
        let mut test = manager.test("t");

        let permutation = test
            .permutation()
            .add_parameter("number_asTable", 11)
            .add_parameter("weight", 0.4);
        assert!(permutation.table_columns.contains("number"));
        assert!(permutation.parameters.contains_key("number"));
        assert!(!permutation.table_key().is_empty());
    }

    #[test]
    fn test_run_records_result() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);

        let kind = manager
            .test("t")
            .permutation()
            .add_parameter("a", 1)
            .add_note("comment", "first")
            .add_result("answer", 42)
            .add_result("nothing", Value::null())
            .run(|| Ok(()))
            .unwrap();
        assert_eq!(kind, ResultKind::Verified);

        let recorded = manager.recorded("t");
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].results().get("answer").map(String::as_str), Some("42"));
        assert!(!recorded[0].results().contains_key("nothing"));
        assert_eq!(recorded[0].notes().get("comment").map(String::as_str), Some("first"));
    }

    #[test]
    fn test_cannot_verify_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);

        let kind = manager
            .test("t")
            .permutation()
            .add_parameter("a", 1)
            .run(|| Err(CannotVerify::new("no network").into()))
            .unwrap();
        assert_eq!(kind, ResultKind::Unverified);
        assert_eq!(manager.recorded("t")[0].not_verified_message(), Some("no network"));
    }

    #[test]
    fn test_no_parameters_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);

        let error = manager.test("t").permutation().run(|| Ok(())).unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_identical_parameters_are_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);
        let mut test = manager.test("t");

        test.permutation().add_parameter("a", 1).run(|| Ok(())).unwrap();
        let error = test
            .permutation()
            .add_parameter("a", 1)
            .run(|| Ok(()))
            .unwrap_err();

        match error {
            Error::DuplicateKey { reason, .. } => assert_eq!(reason, "identical parameters"),
            other => panic!("expected duplicate key error, got {:?}", other),
        }
    }

    #[test]
    fn test_bang_prefix_forces_run() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = manager(&temp_dir);
        manager
            .test("t")
            .permutation()
            .add_parameter("a", 1)
            .run(|| Ok(()))
            .unwrap();
        manager.flush().unwrap();

        let mut reopened = TestManager::open_with(manager.location(), "p", Config::default()).unwrap();
        let ran = std::cell::Cell::new(false);
        reopened
            .test("!t")
            .permutation()
            .add_parameter("a", 1)
            .run(|| {
                ran.set(true);
                Ok(())
            })
            .unwrap();
        assert!(ran.get());
        assert_eq!(reopened.recorded("t").len(), 1);
    }
}
