//! Permutation identity
//!
//! Keys are short content hashes of a permutation's parameters. They are used to find a
//! permutation's previous result and are shown in the accepted file so a human can search
//! for a particular case.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of the hex prefix used as a permutation key
pub const KEY_LENGTH: usize = 7;

/// Length of the hex prefix recorded as a test version
pub const SOURCE_HASH_LENGTH: usize = 16;

/// Digest used to turn a canonical parameter string into a key
pub trait KeyHasher: Send + Sync {
    fn digest(&self, canonical: &str) -> String;
}

/// Default hasher: SHA-256, truncated to [`KEY_LENGTH`] hex characters
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl KeyHasher for Sha256Hasher {
    fn digest(&self, canonical: &str) -> String {
        let mut hex = hex_digest(canonical.as_bytes());
        hex.truncate(KEY_LENGTH);
        hex
    }
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the key for already-serialized parameters.
///
/// An empty parameter set has the empty key. Entries whose value trims to nothing
/// do not contribute.
pub fn compute_key(parameters: &BTreeMap<String, String>, hasher: &dyn KeyHasher) -> String {
    if parameters.is_empty() {
        return String::new();
    }

    let joined = parameters
        .iter()
        .filter_map(|(key, value)| {
            let value = value.trim();
            if value.is_empty() {
                None
            } else {
                Some(format!("{}={}", key, value))
            }
        })
        .collect::<Vec<_>>()
        .join(",");

    hasher.digest(&joined)
}

/// Compute the key over the parameters that are not table columns.
///
/// Returns the empty key when no table columns are declared, so flat results all share
/// one group.
pub fn compute_table_key(
    parameters: &BTreeMap<String, String>,
    table_columns: &BTreeSet<String>,
    hasher: &dyn KeyHasher,
) -> String {
    if table_columns.is_empty() {
        return String::new();
    }

    let description: BTreeMap<String, String> = parameters
        .iter()
        .filter(|(key, _)| !table_columns.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    compute_key(&description, hasher)
}

/// Hash identifying the source that defines a test group.
///
/// When the recorded hash differs from the current one, every permutation of the
/// affected tests is verified again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHash(pub String);

impl SourceHash {
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hex = hex_digest(data);
        hex.truncate(SOURCE_HASH_LENGTH);
        SourceHash(hex)
    }

    pub fn of_str(source: &str) -> Self {
        Self::of_bytes(source.as_bytes())
    }

    pub fn of_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::of_bytes(&data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SourceHash> for String {
    fn from(hash: SourceHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_parameters_have_empty_key() {
        assert_eq!(compute_key(&BTreeMap::new(), &Sha256Hasher), "");
    }

    #[test]
    fn test_key_is_short_hex() {
        let key = compute_key(&params(&[("number", "11")]), &Sha256Hasher);
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_ignores_blank_values() {
        let base = compute_key(&params(&[("a", "1")]), &Sha256Hasher);
        let with_blank = compute_key(&params(&[("a", "1"), ("b", "  ")]), &Sha256Hasher);
        assert_eq!(base, with_blank);
    }

    #[test]
    fn test_table_key_uses_non_table_parameters() {
        let columns: BTreeSet<String> = ["number".to_string()].into_iter().collect();
        let first = compute_table_key(&params(&[("number", "11"), ("weight", "0.4")]), &columns, &Sha256Hasher);
        let second = compute_table_key(&params(&[("number", "20"), ("weight", "0.4")]), &columns, &Sha256Hasher);
        assert_eq!(first, second);
        assert_eq!(first, compute_key(&params(&[("weight", "0.4")]), &Sha256Hasher));

        assert_eq!(compute_table_key(&params(&[("number", "11")]), &BTreeSet::new(), &Sha256Hasher), "");
    }

    #[test]
    fn test_source_hash() {
        let a = SourceHash::of_str("fn test() {}");
        let b = SourceHash::of_str("fn test() { assert!(true) }");
        assert_eq!(a.as_str().len(), SOURCE_HASH_LENGTH);
        assert_ne!(a, b);
        assert_eq!(a, SourceHash::of_bytes(b"fn test() {}"));
    }
}
