use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary identifier of a stored record.
///
/// Always positive (`1..=i64::MAX`). Deserializing a non-positive value
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RecordId(i64);

impl RecordId {
    /// Smallest valid raw identifier.
    pub const MIN_RAW: i64 = 1;

    /// Wraps a raw value, returning `None` if it is not positive.
    #[must_use]
    pub fn new(raw: i64) -> Option<Self> {
        (raw >= Self::MIN_RAW).then_some(Self(raw))
    }

    /// Builds an identifier from 64 random bits.
    ///
    /// The sign bit is dropped and zero is mapped to 1, so every input
    /// yields a valid identifier.
    #[must_use]
    pub fn from_random_bits(bits: u64) -> Self {
        // Masking to 63 bits guarantees the cast cannot wrap.
        #[allow(clippy::cast_possible_wrap)]
        let raw = (bits & (i64::MAX as u64)) as i64;
        Self(raw.max(Self::MIN_RAW))
    }

    /// Returns the raw integer value.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for RecordId {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("record id must be positive, got {raw}"))
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of an indexed field.
///
/// Floats are not indexable; every variant is `Eq + Hash + Ord`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexValue {
    /// Field is absent or explicitly null.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer (also used for foreign record ids).
    Int(i64),
    /// UTF-8 string.
    Str(String),
    /// Wall-clock instant in milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Timestamp(ms) => write!(f, "@{ms}"),
        }
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for IndexValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<RecordId> for IndexValue {
    fn from(value: RecordId) -> Self {
        Self::Int(value.get())
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<T: Into<IndexValue>> From<Option<T>> for IndexValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A single `(field name, value)` pair extracted from a record for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedField {
    /// Name of the indexed field, e.g. `"order_id"`.
    pub name: &'static str,
    /// Current value of the field.
    pub value: IndexValue,
}

impl IndexedField {
    /// Creates an indexed field from anything convertible to [`IndexValue`].
    #[must_use]
    pub fn new(name: &'static str, value: impl Into<IndexValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_rejects_non_positive() {
        assert!(RecordId::new(0).is_none());
        assert!(RecordId::new(-7).is_none());
        assert_eq!(RecordId::new(42).map(RecordId::get), Some(42));
    }

    #[test]
    fn record_id_from_random_bits_is_always_valid() {
        assert_eq!(RecordId::from_random_bits(0).get(), 1);
        assert_eq!(RecordId::from_random_bits(u64::MAX).get(), i64::MAX);
        assert_eq!(RecordId::from_random_bits(1 << 63).get(), 1);
        assert_eq!(RecordId::from_random_bits((1 << 63) | 5).get(), 5);
    }

    #[test]
    fn record_id_serde_rejects_negative() {
        let ok: RecordId = serde_json::from_str("17").unwrap();
        assert_eq!(ok.get(), 17);
        assert!(serde_json::from_str::<RecordId>("-1").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "17");
    }

    #[test]
    fn index_value_conversions() {
        assert_eq!(IndexValue::from("soup"), IndexValue::Str("soup".to_string()));
        assert_eq!(IndexValue::from(3_i32), IndexValue::Int(3));
        assert_eq!(IndexValue::from(None::<i64>), IndexValue::Null);
        assert_eq!(IndexValue::from(Some(true)), IndexValue::Bool(true));
        let id = RecordId::new(9).unwrap();
        assert_eq!(IndexValue::from(id), IndexValue::Int(9));
    }

    #[test]
    fn index_value_ordering_is_total() {
        let mut values = vec![
            IndexValue::Str("b".into()),
            IndexValue::Int(2),
            IndexValue::Null,
            IndexValue::Int(-1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                IndexValue::Null,
                IndexValue::Int(-1),
                IndexValue::Int(2),
                IndexValue::Str("b".into()),
            ]
        );
    }
}
