//! Test manager
//!
//! Owns the accepted results of one test group, hands out permutation builders and
//! decides at flush time what gets written back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::identity::{KeyHasher, Sha256Hasher, SourceHash};
use crate::permutation::TestBuilder;
use crate::report::{FlushReport, Reporter, RunStats};
use crate::result::{PermutationResult, PreviousResults};
use crate::store::{self, ResultsReader, ResultsWriter};

/// A permutation recorded during this session
#[derive(Debug, Clone)]
struct Registration {
    result: PermutationResult,
    ran: bool,
}

/// Accepted results to write and what happened to each test
#[derive(Debug, Clone)]
pub struct FlushPlan {
    pub tests: BTreeMap<String, PreviousResults>,
    pub report: FlushReport,
}

/// Manages the permutations and accepted results of one test group
pub struct TestManager {
    test_group: String,
    location: PathBuf,
    config: Config,
    hasher: Box<dyn KeyHasher>,
    source_hash: Option<SourceHash>,
    previous: BTreeMap<String, PreviousResults>,
    runs: BTreeMap<String, Vec<Registration>>,
    reporter: Option<Box<dyn Reporter + Send>>,
    flushed: Option<FlushReport>,
}

impl TestManager {
    /// Create a manager without loading the accepted file.
    pub fn new(location: impl Into<PathBuf>, test_group: impl Into<String>, config: Config) -> Self {
        Self {
            test_group: test_group.into(),
            location: location.into(),
            config,
            hasher: Box::new(Sha256Hasher),
            source_hash: None,
            previous: BTreeMap::new(),
            runs: BTreeMap::new(),
            reporter: None,
            flushed: None,
        }
    }

    /// Open the accepted file at `location`, configured from the environment.
    pub fn open(location: impl Into<PathBuf>, test_group: impl Into<String>) -> Result<Self> {
        Self::open_with(location, test_group, Config::from_env()?)
    }

    pub fn open_with(
        location: impl Into<PathBuf>,
        test_group: impl Into<String>,
        config: Config,
    ) -> Result<Self> {
        let mut manager = Self::new(location, test_group, config);
        manager.load()?;
        Ok(manager)
    }

    /// Open the accepted file of `test_group` under the configured base directory.
    pub fn for_group(test_group: &str, config: Config) -> Result<Self> {
        let location = config.location_for(test_group);
        Self::open_with(location, test_group, config)
    }

    pub fn with_hasher(mut self, hasher: impl KeyHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    /// Report every flush to `reporter`.
    pub fn with_reporter(mut self, reporter: impl Reporter + Send + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    /// Set the hash of the source defining this test group.
    pub fn with_source_hash(mut self, source_hash: SourceHash) -> Self {
        self.source_hash = Some(source_hash);
        self
    }

    /// Hash the file defining this test group, typically `file!()`.
    pub fn with_source_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let hash = SourceHash::of_file(path.as_ref())?;
        Ok(self.with_source_hash(hash))
    }

    /// (Re)load the accepted results from [`Self::location`].
    pub fn load(&mut self) -> Result<()> {
        let tests = store::load(&self.location, &self.test_group, self.hasher.as_ref())?;
        if !tests.is_empty() {
            debug!("Found previous run stored at {}", self.location.display());
        }
        self.set_previous(tests);
        Ok(())
    }

    /// Load accepted results from a string instead of the file.
    pub fn load_str(&mut self, content: &str) -> Result<()> {
        let tests = ResultsReader::new(self.hasher.as_ref()).read(&self.test_group, content)?;
        self.set_previous(tests);
        Ok(())
    }

    fn set_previous(&mut self, tests: Vec<PreviousResults>) {
        self.previous = tests
            .into_iter()
            .map(|test| (test.test_name().to_string(), test))
            .collect();
    }

    pub fn test_group(&self) -> &str {
        &self.test_group
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hasher(&self) -> &dyn KeyHasher {
        self.hasher.as_ref()
    }

    pub fn source_hash(&self) -> Option<&SourceHash> {
        self.source_hash.as_ref()
    }

    /// Builder for permutations of the named test.
    ///
    /// A name starting with `!` runs every permutation of the test regardless of previous
    /// results; the `!` is not part of the stored name.
    pub fn test(&mut self, test_name: &str) -> TestBuilder<'_> {
        match test_name.strip_prefix('!') {
            Some(name) => TestBuilder::new(self, name).force_run(),
            None => TestBuilder::new(self, test_name),
        }
    }

    pub fn previous_results(&self, test_name: &str) -> Option<&PreviousResults> {
        self.previous.get(test_name)
    }

    pub fn previous_result(&self, test_name: &str, key: &str) -> Option<&PermutationResult> {
        self.previous.get(test_name)?.get(key)
    }

    /// An already recorded permutation of the test with the same key, if any.
    pub fn find_duplicate(&self, test_name: &str, key: &str) -> Option<&PermutationResult> {
        self.runs
            .get(test_name)?
            .iter()
            .map(|registration| &registration.result)
            .find(|result| result.key() == key)
    }

    /// True when both the accepted and the current source hash are known and differ.
    pub fn source_changed(&self, test_name: &str) -> bool {
        let saved = self
            .previous
            .get(test_name)
            .and_then(|previous| previous.source_hash());
        match (saved, &self.source_hash) {
            (Some(saved), Some(current)) => saved != current.as_str(),
            _ => false,
        }
    }

    /// Record the result of a permutation. `ran` is false when the previous result was reused.
    pub fn record(&mut self, test_name: &str, result: PermutationResult, ran: bool) {
        if self.flushed.is_some() {
            warn!(
                "Permutation {} of test \"{}\" recorded after {} was flushed; it will not be saved",
                result.key(),
                test_name,
                self.test_group
            );
        }
        self.runs
            .entry(test_name.to_string())
            .or_default()
            .push(Registration { result, ran });
    }

    /// Results recorded for a test during this session.
    pub fn recorded(&self, test_name: &str) -> Vec<&PermutationResult> {
        self.runs
            .get(test_name)
            .map(|registrations| registrations.iter().map(|r| &r.result).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats::default();
        for registration in self.runs.values().flatten() {
            stats.record(registration.result.kind(), registration.ran);
        }
        stats
    }

    /// Work out what a flush would write, without touching the file.
    pub fn plan_flush(&self) -> FlushPlan {
        let mut tests = BTreeMap::new();
        let mut report = FlushReport {
            test_group: self.test_group.clone(),
            location: self.location.clone(),
            stats: self.stats(),
            ..FlushReport::default()
        };

        if self.runs.is_empty() {
            debug!("No permutations to save for {}", self.test_group);
            return FlushPlan { tests, report };
        }

        let mut something_changed = false;
        for (test_name, registrations) in &self.runs {
            let previous = self.previous.get(test_name);

            if registrations.iter().all(|r| r.result.is_savable()) {
                if registrations.iter().any(|r| r.ran) {
                    something_changed = true;
                }
                let source_hash = match &self.source_hash {
                    Some(hash) => Some(hash.to_string()),
                    None => previous.and_then(|p| p.source_hash()).map(str::to_string),
                };
                let mut accepted = PreviousResults::new(self.test_group.as_str(), test_name.as_str())
                    .with_source_hash(source_hash);
                for registration in registrations {
                    accepted.add_result(registration.result.clone());
                }

                if saved_keys(Some(&accepted)) != saved_keys(previous)
                    || accepted.source_hash() != previous.and_then(|p| p.source_hash())
                {
                    something_changed = true;
                }

                tests.insert(test_name.clone(), accepted);
                report.saved.push(test_name.clone());
            } else {
                debug!("Not saving test \"{}\" of {}: a permutation failed", test_name, self.test_group);
                if let Some(previous) = previous {
                    tests.insert(test_name.clone(), previous.clone());
                }
                report.dropped.push(test_name.clone());
            }
        }

        let only_one_test_ran = self.runs.len() == 1;
        for (test_name, previous) in &self.previous {
            if self.runs.contains_key(test_name) {
                continue;
            }
            if only_one_test_ran || self.config.retain_unrun_tests {
                tests.insert(test_name.clone(), previous.clone());
                report.retained.push(test_name.clone());
            } else {
                info!(
                    "Test \"{}\" was in the accepted results but did not run. Removing it from {}",
                    test_name,
                    self.location.display()
                );
                report.removed.push(test_name.clone());
                something_changed = true;
            }
        }

        if !something_changed {
            debug!("No permutations executed for {}, not writing results", self.test_group);
        }
        report.written = something_changed;

        FlushPlan { tests, report }
    }

    /// Write the accepted file. Only the first call has an effect; later calls return the
    /// same report.
    pub fn flush(&mut self) -> Result<FlushReport> {
        if let Some(report) = &self.flushed {
            return Ok(report.clone());
        }

        let plan = self.plan_flush();
        if plan.report.written {
            ResultsWriter::new().write(&self.location, plan.tests.values())?;
            info!("Saved results of {} to {}", self.test_group, self.location.display());
        }

        if let Some(reporter) = &self.reporter {
            reporter.on_flush(&plan.report);
        }
        self.flushed = Some(plan.report.clone());
        Ok(plan.report)
    }

    /// Flush and release the manager.
    pub fn close(mut self) -> Result<FlushReport> {
        self.flush()
    }
}

impl Drop for TestManager {
    fn drop(&mut self) {
        if self.flushed.is_none() && !self.runs.is_empty() && !std::thread::panicking() {
            warn!(
                "Results of {} were never flushed; call flush() or close() to save them",
                self.test_group
            );
        }
    }
}

fn saved_keys(results: Option<&PreviousResults>) -> Vec<&str> {
    results
        .map(|results| {
            results
                .sorted_results()
                .into_iter()
                .filter(|r| r.is_valid())
                .map(|r| r.key())
                .collect()
        })
        .unwrap_or_default()
}
