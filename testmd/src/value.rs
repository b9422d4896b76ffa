//! Values attached to permutations
//!
//! A [`Value`] wraps a raw value together with the [`ValueFormat`] used to turn it into
//! the string that is compared against previous runs and written to the accepted file.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use once_cell::sync::OnceCell;

/// Scalar leaf values
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::UInt(u) => Some(*u as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::UInt(u) => write!(f, "{}", u),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// The shape of a stored value
#[derive(Debug, Clone)]
pub enum Raw {
    Scalar(Scalar),
    Sequence(Vec<Raw>),
    Mapping(Vec<(Raw, Raw)>),
    /// A value that keeps its own formatter inside a larger structure
    Nested(Box<Value>),
}

impl Raw {
    /// Null values and empty collections count as "not set".
    pub fn is_absent(&self) -> bool {
        match self {
            Raw::Scalar(Scalar::Null) => true,
            Raw::Sequence(items) => items.is_empty(),
            Raw::Mapping(entries) => entries.is_empty(),
            Raw::Nested(value) => value.raw.is_absent(),
            Raw::Scalar(_) => false,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Raw::Scalar(Scalar::Null) => true,
            Raw::Nested(value) => value.raw.is_null(),
            _ => false,
        }
    }
}

pub type FormatFn = dyn Fn(&Raw) -> String + Send + Sync;

/// Serialization strategy for a [`Value`]
#[derive(Clone, Default)]
pub enum ValueFormat {
    /// Natural string form; sequences keep their order
    #[default]
    Default,
    /// Like `Default`, but sequence elements are sorted so collection order never matters
    Canonical,
    /// Caller-supplied formatting
    Custom(Arc<FormatFn>),
}

impl ValueFormat {
    pub fn custom(format: impl Fn(&Raw) -> String + Send + Sync + 'static) -> Self {
        ValueFormat::Custom(Arc::new(format))
    }

    pub fn format(&self, raw: &Raw) -> String {
        match self {
            ValueFormat::Default => render(raw, false),
            ValueFormat::Canonical => render(raw, true),
            ValueFormat::Custom(format) => format(raw),
        }
    }

    fn is_default(&self) -> bool {
        matches!(self, ValueFormat::Default)
    }
}

impl fmt::Debug for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFormat::Default => write!(f, "Default"),
            ValueFormat::Canonical => write!(f, "Canonical"),
            ValueFormat::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn render(raw: &Raw, sorted: bool) -> String {
    match raw {
        Raw::Scalar(scalar) => scalar.to_string(),
        Raw::Sequence(items) => {
            let mut items: Vec<&Raw> = items.iter().collect();
            if sorted {
                items.sort_by(|a, b| compare_raw(a, b, sorted));
            }
            let rendered: Vec<String> = items.iter().map(|item| render(item, sorted)).collect();
            format!("[{}]", rendered.join(", "))
        }
        Raw::Mapping(entries) => {
            let mut entries: Vec<&(Raw, Raw)> = entries.iter().collect();
            entries.sort_by(|(a, _), (b, _)| compare_raw(a, b, sorted));
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}={}", render(k, sorted), render(v, sorted)))
                .collect();
            format!("[{}]", rendered.join(", "))
        }
        Raw::Nested(value) => {
            if sorted {
                value.canonical()
            } else {
                value.serialize().to_string()
            }
        }
    }
}

/// Numbers compare numerically, everything else by rendered form.
fn compare_raw(a: &Raw, b: &Raw, sorted: bool) -> Ordering {
    if let (Raw::Scalar(x), Raw::Scalar(y)) = (a, b) {
        if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
            if let Some(ordering) = x.partial_cmp(&y) {
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
    render(a, sorted).cmp(&render(b, sorted))
}

fn normalize_newlines(value: String) -> String {
    if value.contains('\r') {
        value.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        value
    }
}

/// A raw value plus the format used to serialize it
#[derive(Debug, Clone)]
pub struct Value {
    raw: Raw,
    format: ValueFormat,
    serialized: OnceCell<String>,
}

impl Value {
    pub fn new(raw: Raw, format: ValueFormat) -> Self {
        Self {
            raw,
            format,
            serialized: OnceCell::new(),
        }
    }

    pub fn null() -> Self {
        Self::new(Raw::Scalar(Scalar::Null), ValueFormat::Default)
    }

    pub fn with_format(self, format: ValueFormat) -> Self {
        Self::new(self.raw, format)
    }

    pub fn raw(&self) -> &Raw {
        &self.raw
    }

    pub fn format(&self) -> &ValueFormat {
        &self.format
    }

    pub fn is_absent(&self) -> bool {
        self.raw.is_absent()
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// The string form written to the accepted file, computed once.
    pub fn serialize(&self) -> &str {
        self.serialized
            .get_or_init(|| normalize_newlines(self.format.format(&self.raw)))
    }

    /// Order-insensitive form used for parameters and permutation keys.
    ///
    /// A custom format is honored as-is.
    pub fn canonical(&self) -> String {
        let rendered = match &self.format {
            ValueFormat::Custom(format) => format(&self.raw),
            _ => render(&self.raw, true),
        };
        normalize_newlines(rendered)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

impl From<Value> for Raw {
    fn from(value: Value) -> Self {
        if value.format.is_default() {
            value.raw
        } else {
            Raw::Nested(Box::new(value))
        }
    }
}

impl From<Raw> for Value {
    fn from(raw: Raw) -> Self {
        Value::new(raw, ValueFormat::Default)
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        Value::from(Raw::Scalar(scalar))
    }
}

macro_rules! scalar_from {
    ($variant:ident as $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::from(Scalar::$variant(value as $target))
                }
            }
        )*
    };
}

scalar_from!(Int as i64: i8, i16, i32, i64, isize);
scalar_from!(UInt as u64: u8, u16, u32, u64, usize);
scalar_from!(Float as f64: f64);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        // Going through the shortest f32 representation keeps 0.4f32 as "0.4"
        let value = value.to_string().parse::<f64>().unwrap_or(value as f64);
        Value::from(Scalar::Float(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::from(Scalar::Bool(value))
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::from(Scalar::Text(value.to_string()))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::from(Scalar::Text(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::from(Scalar::Text(value))
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::from(value.as_str())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Value::null)
    }
}

fn sequence<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
    Value::from(Raw::Sequence(
        items.into_iter().map(|item| Raw::from(item.into())).collect(),
    ))
}

fn mapping<K: Into<Value>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Value {
    Value::from(Raw::Mapping(
        entries
            .into_iter()
            .map(|(k, v)| (Raw::from(k.into()), Raw::from(v.into())))
            .collect(),
    ))
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        sequence(items)
    }
}

impl<T: Clone + Into<Value>> From<&[T]> for Value {
    fn from(items: &[T]) -> Self {
        sequence(items.iter().cloned())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(items: [T; N]) -> Self {
        sequence(items)
    }
}

impl<T: Into<Value>> From<BTreeSet<T>> for Value {
    fn from(items: BTreeSet<T>) -> Self {
        sequence(items)
    }
}

impl<T: Into<Value>> From<HashSet<T>> for Value {
    fn from(items: HashSet<T>) -> Self {
        sequence(items)
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(entries: BTreeMap<K, V>) -> Self {
        mapping(entries)
    }
}

impl<K: Into<Value>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(entries: HashMap<K, V>) -> Self {
        mapping(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_serialization() {
        assert_eq!(Value::from(11).serialize(), "11");
        assert_eq!(Value::from(0.4).serialize(), "0.4");
        assert_eq!(Value::from(0.4f32).serialize(), "0.4");
        assert_eq!(Value::from(true).serialize(), "true");
        assert_eq!(Value::from("abc").serialize(), "abc");
        assert_eq!(Value::from(11.0 * 0.4).serialize(), "4.4");
    }

    #[test]
    fn test_sequences_keep_order_by_default() {
        let value = Value::from(vec![3, 1, 2]);
        assert_eq!(value.serialize(), "[3, 1, 2]");
        assert_eq!(value.canonical(), "[1, 2, 3]");
    }

    #[test]
    fn test_canonical_sorts_numbers_numerically() {
        let value = Value::from(vec![10, 9, 100]);
        assert_eq!(value.canonical(), "[9, 10, 100]");
    }

    #[test]
    fn test_mapping_sorted_by_key() {
        let mut map = HashMap::new();
        map.insert("b", 2);
        map.insert("a", 1);
        let value = Value::from(map);
        assert_eq!(value.serialize(), "[a=1, b=2]");
        assert_eq!(value.canonical(), "[a=1, b=2]");
    }

    #[test]
    fn test_nested_sequences() {
        let value = Value::from(vec![vec!["b", "a"], vec!["c"]]);
        assert_eq!(value.serialize(), "[[b, a], [c]]");
        assert_eq!(value.canonical(), "[[a, b], [c]]");
    }

    #[test]
    fn test_custom_format() {
        let format = ValueFormat::custom(|raw| match raw {
            Raw::Scalar(Scalar::Text(text)) => text.to_uppercase(),
            other => format!("{:?}", other),
        });
        let value = Value::from("select").with_format(format);
        assert_eq!(value.serialize(), "SELECT");
        assert_eq!(value.canonical(), "SELECT");

        let outer = Value::from(vec![value, Value::from("x")]);
        assert_eq!(outer.serialize(), "[SELECT, x]");
    }

    #[test]
    fn test_absent_values() {
        assert!(Value::null().is_absent());
        assert!(Value::from(Vec::<i32>::new()).is_absent());
        assert!(Value::from(HashMap::<String, String>::new()).is_absent());
        assert!(Value::from(None::<i32>).is_absent());
        assert!(!Value::from(Some(0)).is_absent());
        assert!(!Value::from("").is_absent());
    }

    #[test]
    fn test_newlines_are_normalized() {
        let value = Value::from("a\r\nb\rc");
        assert_eq!(value.serialize(), "a\nb\nc");
    }
}
