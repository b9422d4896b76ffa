//! testmd - approval testing with permutations
//!
//! Tests declare permutations (parameterized cases) together with the observable results
//! they produce. Accepted results are kept in a markdown file per test group; a permutation
//! whose results match its previously verified run is not verified again, and any change
//! shows up as a readable diff of the accepted file.

pub mod config;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod manager;
pub mod permutation;
pub mod report;
pub mod result;
pub mod store;
pub mod value;

pub use config::{Config, ConfigError};
pub use error::{CannotVerify, Error, Result};
pub use identity::{KeyHasher, Sha256Hasher, SourceHash};
pub use lifecycle::SetupResult;
pub use manager::{FlushPlan, TestManager};
pub use permutation::{Permutation, TestBuilder};
pub use report::{ConsoleReporter, FileSummary, FlushReport, JsonReporter, Reporter, RunStats};
pub use result::{PermutationResult, PreviousResults, ResultKind};
pub use store::{ResultsReader, ResultsWriter};
pub use value::{Raw, Scalar, Value, ValueFormat};
