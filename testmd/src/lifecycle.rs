//! Run lifecycle of a single permutation
//!
//! A permutation either reuses its previous verified result or goes through
//! setup, verification and cleanup. Cleanup runs exactly once whenever setup was
//! entered, whatever happened afterwards.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use once_cell::sync::Lazy;
use tracing::{debug, error, warn};

use crate::error::{CannotVerify, Error, Result};
use crate::result::{PermutationResult, ResultKind};

/// Outcome of a permutation's setup logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupResult {
    /// Setup succeeded, verification may run
    Ok,
    /// The permutation is valid but cannot be verified in this environment
    CannotVerify(String),
    /// The permutation does not apply and is not stored
    Invalid(String),
}

impl SetupResult {
    /// Skip the permutation entirely.
    pub fn skip(message: impl Into<String>) -> Self {
        SetupResult::Invalid(message.into())
    }

    pub fn cannot_verify(message: impl Into<String>) -> Self {
        SetupResult::CannotVerify(message.into())
    }
}

pub type SetupFn<'a> = Box<dyn FnOnce() -> anyhow::Result<SetupResult> + 'a>;
pub type CleanupFn<'a> = Box<dyn FnOnce() -> anyhow::Result<()> + 'a>;

/// Reason a permutation is executed even if its previous result could be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReason {
    /// The permutation or its test asked for it
    Permutation,
    /// `force_rerun` is configured
    Config,
    /// The test's source hash changed since the accepted run
    SourceChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Results are unchanged since a verified run
    Skip,
    Run,
}

/// Decide whether a permutation must be executed.
pub fn decide(
    previous: Option<&PermutationResult>,
    results: &BTreeMap<String, String>,
    force: Option<ForceReason>,
) -> Decision {
    if let Some(reason) = force {
        debug!("Forced run ({:?})", reason);
        return Decision::Run;
    }

    match previous {
        None => {
            debug!("No previous result for permutation");
            Decision::Run
        }
        Some(previous) if !previous.is_verified() => {
            debug!("Previous permutation run was NOT verified");
            Decision::Run
        }
        Some(previous) if previous.results() == results => {
            debug!("Permutation is unchanged since the verified run, not running again");
            Decision::Skip
        }
        Some(_) => {
            debug!("Permutation changed since the verified run, testing again");
            Decision::Run
        }
    }
}

/// A failure that must reach the caller after the result has been recorded
pub enum Failure {
    Error(Error),
    Panic(Box<dyn Any + Send>),
}

impl Failure {
    /// Return the error, or resume unwinding with the original panic.
    pub fn into_result<T>(self) -> Result<T> {
        match self {
            Failure::Error(e) => Err(e),
            Failure::Panic(payload) => panic::resume_unwind(payload),
        }
    }
}

impl std::fmt::Debug for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Failure::Panic(payload) => f.debug_tuple("Panic").field(&panic_message(&**payload)).finish(),
        }
    }
}

/// What an executed lifecycle produced
#[derive(Debug)]
pub struct Outcome {
    pub kind: ResultKind,
    pub message: Option<String>,
    pub failure: Option<Failure>,
}

impl Outcome {
    fn new(kind: ResultKind, message: Option<String>) -> Self {
        Self {
            kind,
            message,
            failure: None,
        }
    }

    fn failed(failure: Failure) -> Self {
        Self {
            kind: ResultKind::Failed,
            message: None,
            failure: Some(failure),
        }
    }
}

enum Caught {
    Error(anyhow::Error),
    Panic(Box<dyn Any + Send>),
}

impl std::fmt::Display for Caught {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Caught::Error(e) => write!(f, "{:#}", e),
            Caught::Panic(payload) => write!(f, "panic: {}", panic_message(&**payload)),
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> std::result::Result<T, Caught> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Caught::Error(e)),
        Err(payload) => Err(Caught::Panic(payload)),
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Setup, verification and cleanup of one permutation
pub struct Lifecycle<'a> {
    context: String,
    setup: Option<SetupFn<'a>>,
    cleanup: Option<CleanupFn<'a>>,
}

impl<'a> Lifecycle<'a> {
    /// `context` describes the permutation in error messages.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            setup: None,
            cleanup: None,
        }
    }

    pub fn setup(mut self, setup: impl FnOnce() -> anyhow::Result<SetupResult> + 'a) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn cleanup(mut self, cleanup: impl FnOnce() -> anyhow::Result<()> + 'a) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn with_setup(mut self, setup: Option<SetupFn<'a>>) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Option<CleanupFn<'a>>) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn execute(self, verification: impl FnOnce() -> anyhow::Result<()>) -> Outcome {
        let Lifecycle {
            context,
            setup,
            cleanup,
        } = self;

        if let Some(setup) = setup {
            debug!("Executing permutation setup");
            match guarded(setup) {
                Ok(SetupResult::Ok) => {}
                Ok(SetupResult::Invalid(message)) => {
                    warn!("Permutation setup is not valid: {}\n{}", message, context);
                    let outcome = Outcome::new(ResultKind::Invalid, Some(message));
                    return run_cleanup(outcome, cleanup, &context);
                }
                Ok(SetupResult::CannotVerify(message)) => {
                    debug!("Cannot verify: {}\n{}", message, context);
                    let outcome = Outcome::new(ResultKind::Unverified, Some(message));
                    return run_cleanup(outcome, cleanup, &context);
                }
                Err(caught) => {
                    if let Some(cleanup) = cleanup {
                        if let Err(cleanup_error) = guarded(cleanup) {
                            error!("Error executing cleanup after setup failure: {}", cleanup_error);
                        }
                    }
                    let failure = match caught {
                        Caught::Error(source) => Failure::Error(Error::Setup { context, source }),
                        Caught::Panic(payload) => {
                            error!(
                                "Setup panicked: {}\n{}",
                                panic_message(&*payload),
                                context
                            );
                            Failure::Panic(payload)
                        }
                    };
                    return Outcome::failed(failure);
                }
            }
        }

        debug!("Executing permutation verification");
        let outcome = match guarded(verification) {
            Ok(()) => Outcome::new(ResultKind::Verified, None),
            Err(Caught::Error(source)) => match source.downcast_ref::<CannotVerify>() {
                Some(cannot_verify) => {
                    debug!("Cannot verify: {}", cannot_verify);
                    Outcome::new(ResultKind::Unverified, Some(cannot_verify.message.clone()))
                }
                None => {
                    error!("Failure running permutation: {:#}", source);
                    Outcome::failed(Failure::Error(Error::VerificationFailed {
                        context: context.clone(),
                        source,
                    }))
                }
            },
            Err(Caught::Panic(payload)) => {
                error!(
                    "Assertion failed executing verification: {}\n{}",
                    panic_message(&*payload),
                    context
                );
                Outcome::failed(Failure::Panic(payload))
            }
        };

        run_cleanup(outcome, cleanup, &context)
    }
}

fn run_cleanup(mut outcome: Outcome, cleanup: Option<CleanupFn<'_>>, context: &str) -> Outcome {
    let Some(cleanup) = cleanup else {
        return outcome;
    };

    debug!("Executing permutation cleanup");
    if let Err(caught) = guarded(cleanup) {
        if outcome.failure.is_some() {
            error!("Error executing cleanup: {}", caught);
            return outcome;
        }

        outcome.kind = ResultKind::Failed;
        outcome.message = None;
        outcome.failure = Some(match caught {
            Caught::Error(source) => Failure::Error(Error::Cleanup {
                context: context.to_string(),
                source,
            }),
            Caught::Panic(payload) => {
                error!("Cleanup panicked: {}\n{}", panic_message(&*payload), context);
                Failure::Panic(payload)
            }
        });
    }
    outcome
}

/// Human readable description of a permutation, indented for log and error output.
pub fn describe(
    parameters: &BTreeMap<String, String>,
    notes: &BTreeMap<String, String>,
    results: &BTreeMap<String, String>,
) -> String {
    let sections = [
        ("Description", parameters),
        ("Note(s)", notes),
        ("Result(s)", results),
    ];

    let text = sections
        .iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(label, entries)| format!("{}: {}", label, join_entries(entries)))
        .collect::<Vec<_>>()
        .join("\n");

    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn join_entries(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}

static WARNED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Log a warning the first time a given message is seen in this process.
pub fn warn_once(message: &str) {
    let first = match WARNED.lock() {
        Ok(mut warned) => warned.insert(message.to_string()),
        Err(poisoned) => poisoned.into_inner().insert(message.to_string()),
    };
    if first {
        warn!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Sha256Hasher;
    use std::cell::Cell;

    fn strings(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn previous(kind: ResultKind, results: &[(&str, &str)]) -> PermutationResult {
        PermutationResult::new(kind, strings(&[("a", "1")]), Default::default(), &Sha256Hasher)
            .with_results(strings(results))
    }

    #[test]
    fn test_decide() {
        let results = strings(&[("sql", "select 1")]);
        let verified = previous(ResultKind::Verified, &[("sql", "select 1")]);
        let unverified = previous(ResultKind::Unverified, &[("sql", "select 1")]);
        let changed = previous(ResultKind::Verified, &[("sql", "select 2")]);
        let extra = previous(ResultKind::Verified, &[("sql", "select 1"), ("other", "x")]);

        assert_eq!(decide(None, &results, None), Decision::Run);
        assert_eq!(decide(Some(&verified), &results, None), Decision::Skip);
        assert_eq!(decide(Some(&unverified), &results, None), Decision::Run);
        assert_eq!(decide(Some(&changed), &results, None), Decision::Run);
        assert_eq!(decide(Some(&extra), &results, None), Decision::Run);
        assert_eq!(
            decide(Some(&verified), &results, Some(ForceReason::SourceChanged)),
            Decision::Run
        );
    }

    #[test]
    fn test_verified_runs_cleanup_once() {
        let cleanups = Cell::new(0);
        let outcome = Lifecycle::new("ctx")
            .cleanup(|| {
                cleanups.set(cleanups.get() + 1);
                Ok(())
            })
            .execute(|| Ok(()));

        assert_eq!(outcome.kind, ResultKind::Verified);
        assert!(outcome.failure.is_none());
        assert_eq!(cleanups.get(), 1);
    }

    #[test]
    fn test_setup_outcomes() {
        let verified = Cell::new(false);
        let cleanups = Cell::new(0);

        let outcome = Lifecycle::new("ctx")
            .setup(|| Ok(SetupResult::skip("not supported")))
            .cleanup(|| {
                cleanups.set(cleanups.get() + 1);
                Ok(())
            })
            .execute(|| {
                verified.set(true);
                Ok(())
            });
        assert_eq!(outcome.kind, ResultKind::Invalid);
        assert_eq!(outcome.message.as_deref(), Some("not supported"));

        let outcome = Lifecycle::new("ctx")
            .setup(|| Ok(SetupResult::cannot_verify("no database")))
            .cleanup(|| {
                cleanups.set(cleanups.get() + 1);
                Ok(())
            })
            .execute(|| {
                verified.set(true);
                Ok(())
            });
        assert_eq!(outcome.kind, ResultKind::Unverified);
        assert_eq!(outcome.message.as_deref(), Some("no database"));

        assert!(!verified.get());
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn test_setup_error_runs_cleanup_and_fails() {
        let cleaned = Cell::new(false);
        let outcome = Lifecycle::new("    Description: a=\"1\"")
            .setup(|| anyhow::bail!("connection refused"))
            .cleanup(|| {
                cleaned.set(true);
                anyhow::bail!("cleanup also broke")
            })
            .execute(|| Ok(()));

        assert_eq!(outcome.kind, ResultKind::Failed);
        assert!(cleaned.get());
        match outcome.failure {
            Some(Failure::Error(Error::Setup { context, source })) => {
                assert!(context.contains("a=\"1\""));
                assert_eq!(source.to_string(), "connection refused");
            }
            other => panic!("expected setup error, got {:?}", other),
        }
    }

    #[test]
    fn test_cannot_verify_from_verification() {
        let outcome = Lifecycle::new("ctx")
            .execute(|| Err(CannotVerify::new("requires network").into()));
        assert_eq!(outcome.kind, ResultKind::Unverified);
        assert_eq!(outcome.message.as_deref(), Some("requires network"));
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_verification_error_fails() {
        let outcome = Lifecycle::new("ctx").execute(|| anyhow::bail!("wrong answer"));
        assert_eq!(outcome.kind, ResultKind::Failed);
        assert!(matches!(
            outcome.failure,
            Some(Failure::Error(Error::VerificationFailed { .. }))
        ));
    }

    #[test]
    fn test_verification_panic_is_captured() {
        let cleaned = Cell::new(false);
        let outcome = Lifecycle::new("ctx")
            .cleanup(|| {
                cleaned.set(true);
                Ok(())
            })
            .execute(|| {
                assert_eq!(1 + 1, 3, "math is broken");
                Ok(())
            });

        assert_eq!(outcome.kind, ResultKind::Failed);
        assert!(cleaned.get());
        match outcome.failure {
            Some(Failure::Panic(payload)) => {
                assert!(panic_message(&*payload).contains("math is broken"))
            }
            other => panic!("expected panic, got {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_failure_alone_fails() {
        let outcome = Lifecycle::new("ctx")
            .cleanup(|| anyhow::bail!("could not drop table"))
            .execute(|| Ok(()));
        assert_eq!(outcome.kind, ResultKind::Failed);
        assert!(matches!(outcome.failure, Some(Failure::Error(Error::Cleanup { .. }))));
    }

    #[test]
    fn test_cleanup_failure_does_not_replace_verification_failure() {
        let outcome = Lifecycle::new("ctx")
            .cleanup(|| anyhow::bail!("could not drop table"))
            .execute(|| anyhow::bail!("wrong answer"));
        assert!(matches!(
            outcome.failure,
            Some(Failure::Error(Error::VerificationFailed { .. }))
        ));
    }

    #[test]
    fn test_describe() {
        let text = describe(
            &strings(&[("number", "11")]),
            &BTreeMap::new(),
            &strings(&[("weighted", "4.4")]),
        );
        assert_eq!(
            text,
            "    Description: number=\"11\"\n    Result(s): weighted=\"4.4\""
        );
    }
}
