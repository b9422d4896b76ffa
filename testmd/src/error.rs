//! Error types for permutation runs and accepted-file handling

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Key collision with another permutation in test \"{test_name}\" ({reason}). Make sure parameters fully differentiate all permutations.\nPermutation: {permutation}\nalso matches: {existing}")]
    DuplicateKey {
        test_name: String,
        permutation: String,
        existing: String,
        reason: &'static str,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Error executing setup: {source}\n{context}")]
    Setup {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Verification failed: {source}\n{context}")]
    VerificationFailed {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Error executing cleanup: {source}\n{context}")]
    Cleanup {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not parse line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that come from misconfigured tests rather than from the logic under test.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateKey { .. } | Error::Configuration { .. } | Error::Config(_)
        )
    }
}

/// Signal raised from verification logic when a permutation cannot be verified.
///
/// Return it through `anyhow` from a verification closure; the permutation is then
/// stored as not verified instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CannotVerify {
    pub message: String,
}

impl CannotVerify {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_display_their_cause() {
        let setup = Error::Setup {
            context: "    Description: a = 1".to_string(),
            source: anyhow::anyhow!("database unavailable"),
        };
        let message = setup.to_string();
        assert!(message.starts_with("Error executing setup: database unavailable\n"));
        assert!(message.ends_with("Description: a = 1"));

        let cleanup = Error::Cleanup {
            context: String::new(),
            source: anyhow::anyhow!("disk full"),
        };
        assert!(cleanup.to_string().contains("disk full"));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(Error::configuration("no parameters").is_configuration());
        assert!(!Error::parse(3, "bad").is_configuration());
        assert_eq!(Error::parse(3, "bad").to_string(), "Could not parse line 3: bad");
    }
}
