//! The dynamic value type used by property bags and the script layer.
//!
//! Containers use `BTreeMap`/`BTreeSet` with [`Value`] keys, so `Value`
//! carries a total order: by kind first, then by payload, with doubles ordered
//! by `total_cmp`. Scalars of different kinds never compare equal; the blob
//! hash folds the kind tag in for the same reason.

use std::collections::{BTreeMap, BTreeSet};

use crate::hash::{hash_bytes, hash_pair};
use crate::NONE;

// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueKind {
    None = 0,
    Bool = 1,
    I64 = 2,
    F64 = 3,
    Text = 4,
    List = 5,
    Set = 6,
    Dict = 7,
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Dict(BTreeMap<Value, Value>),
}

impl Value {
    #[inline]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Bool(_) => ValueKind::Bool,
            Self::I64(_) => ValueKind::I64,
            Self::F64(_) => ValueKind::F64,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
            Self::Set(_) => ValueKind::Set,
            Self::Dict(_) => ValueKind::Dict,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Dict(_))
    }

    /// Member count for containers, `0`/`1` for none/scalars.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::List(items) => items.len(),
            Self::Set(items) => items.len(),
            Self::Dict(items) => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::I64(v) => Some(*v),
            Self::F64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Container membership; scalars contain themselves, text contains
    /// substrings.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Self::List(items) => items.contains(needle),
            Self::Set(items) => items.contains(needle),
            Self::Dict(items) => items.contains_key(needle),
            Self::Text(s) => needle.as_str().is_some_and(|sub| s.contains(sub)),
            other => other == needle,
        }
    }

    /// The scalar members of this value: the value itself, or the members of
    /// a list/set. Dicts yield nothing (their members are named, not valued).
    pub fn iter_scalars(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Self::List(items) => Box::new(items.iter()),
            Self::Set(items) => Box::new(items.iter()),
            Self::Dict(_) | Self::None => Box::new(std::iter::empty()),
            scalar => Box::new(std::iter::once(scalar)),
        }
    }
}

// --- ordering & equality ---

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Self::None, Self::None) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::I64(a), Self::I64(b)) => a.cmp(b),
            (Self::F64(a), Self::F64(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Dict(a), Self::Dict(b)) => a.cmp(b),
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

// --- conversions ---

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Into::into).collect())
    }
}

// ----------------------------------------------------------------------------
// Blob codec
//
// Wire form of a value inside a props bag:
//   u8 kind
//   Bool: u8
//   I64:  u8 width in {1,2,4,8}, then that many LE bytes (sign-extended)
//   F64:  8 LE bytes (bit pattern)
//   Text: u16 len, utf-8 bytes
//   List/Set: u16 count, members
//   Dict: u16 count, (key, value) pairs

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("value blob truncated")]
    Truncated,

    #[error("unknown kind tag {0}")]
    UnknownKind(u8),

    #[error("bad int width {0}")]
    BadWidth(u8),

    #[error("value blob holds invalid utf-8")]
    BadText(#[from] std::str::Utf8Error),
}

#[inline]
fn int_width(v: i64) -> u8 {
    if v >= i64::from(i8::MIN) && v <= i64::from(i8::MAX) {
        1
    } else if v >= i64::from(i16::MIN) && v <= i64::from(i16::MAX) {
        2
    } else if v >= i64::from(i32::MIN) && v <= i64::from(i32::MAX) {
        4
    } else {
        8
    }
}

fn take<'b>(read: &mut &'b [u8], len: usize) -> Result<&'b [u8], BlobError> {
    if read.len() < len {
        return Err(BlobError::Truncated);
    }
    let (head, tail) = read.split_at(len);
    *read = tail;
    Ok(head)
}

impl Value {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind() as u8);
        match self {
            Self::None => {}
            Self::Bool(b) => out.push(u8::from(*b)),
            Self::I64(v) => {
                let width = int_width(*v);
                out.push(width);
                out.extend_from_slice(&v.to_le_bytes()[..width as usize]);
            }
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Text(s) => {
                out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Self::List(items) => {
                out.extend_from_slice(&(items.len() as u16).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Self::Set(items) => {
                out.extend_from_slice(&(items.len() as u16).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Self::Dict(items) => {
                out.extend_from_slice(&(items.len() as u16).to_le_bytes());
                for (key, value) in items {
                    key.encode_into(out);
                    value.encode_into(out);
                }
            }
        }
    }

    pub fn decode(read: &mut &[u8]) -> Result<Self, BlobError> {
        let kind = take(read, 1)?[0];
        Ok(match kind {
            0 => Self::None,
            1 => Self::Bool(take(read, 1)?[0] != 0),
            2 => {
                let width = take(read, 1)?[0];
                if !matches!(width, 1 | 2 | 4 | 8) {
                    return Err(BlobError::BadWidth(width));
                }
                let bytes = take(read, width as usize)?;
                // Sign-extend from the stored width.
                let mut buf = if bytes[width as usize - 1] & 0x80 != 0 {
                    [0xFF; 8]
                } else {
                    [0; 8]
                };
                buf[..width as usize].copy_from_slice(bytes);
                Self::I64(i64::from_le_bytes(buf))
            }
            3 => Self::F64(f64::from_le_bytes(take(read, 8)?.try_into().expect("8 bytes"))),
            4 => {
                let len = u16::from_le_bytes(take(read, 2)?.try_into().expect("2 bytes")) as usize;
                Self::Text(std::str::from_utf8(take(read, len)?)?.to_owned())
            }
            5 | 6 | 7 => {
                let count = u16::from_le_bytes(take(read, 2)?.try_into().expect("2 bytes"));
                match kind {
                    5 => {
                        let mut items = Vec::with_capacity(count as usize);
                        for _ in 0..count {
                            items.push(Self::decode(read)?);
                        }
                        Self::List(items)
                    }
                    6 => {
                        let mut items = BTreeSet::new();
                        for _ in 0..count {
                            items.insert(Self::decode(read)?);
                        }
                        Self::Set(items)
                    }
                    _ => {
                        let mut items = BTreeMap::new();
                        for _ in 0..count {
                            let key = Self::decode(read)?;
                            items.insert(key, Self::decode(read)?);
                        }
                        Self::Dict(items)
                    }
                }
            }
            other => return Err(BlobError::UnknownKind(other)),
        })
    }

    /// Stable content hash of a value tree.
    ///
    /// Feeds the "did the props bag actually change" check, so it must not
    /// depend on allocation or process state. Dict members whose value is
    /// `None` do not participate; a bag that gained and lost a key hashes the
    /// same as one that never had it.
    pub fn blob_hash(&self) -> i64 {
        let mut hash = 0x7ace_f5ee_ddea_dbee_i64;
        self.hash_recursive(&mut hash);
        hash
    }

    fn hash_recursive(&self, hash: &mut i64) {
        *hash = hash_pair(self.kind() as i64, *hash);
        match self {
            Self::None => {}
            Self::Bool(b) => *hash = hash_pair(i64::from(*b), *hash),
            Self::I64(v) => {
                if *v != NONE {
                    *hash = hash_pair(*v, *hash);
                }
            }
            Self::F64(v) => *hash = hash_pair(v.to_bits() as i64, *hash),
            Self::Text(s) => *hash = hash_pair(hash_bytes(s.as_bytes()), *hash),
            Self::List(items) => {
                for item in items {
                    item.hash_recursive(hash);
                }
            }
            Self::Set(items) => {
                for item in items {
                    item.hash_recursive(hash);
                }
            }
            Self::Dict(items) => {
                for (key, value) in items {
                    let unset = match value {
                        Self::None => true,
                        Self::I64(v) => *v == NONE,
                        _ => false,
                    };
                    if unset {
                        continue;
                    }
                    key.hash_recursive(hash);
                    value.hash_recursive(hash);
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dict() -> Value {
        let mut dict = BTreeMap::new();
        dict.insert(Value::from("country"), Value::from("CA"));
        dict.insert(Value::from("visits"), Value::from(12_i64));
        dict.insert(
            Value::from("tags"),
            Value::Set([Value::from("a"), Value::from("b")].into()),
        );
        Value::Dict(dict)
    }

    #[test]
    fn codec_round_trip() {
        for value in [
            Value::None,
            Value::from(true),
            Value::from(-1_i64),
            Value::from(i64::MAX),
            Value::from(3.25),
            Value::from("hello"),
            Value::from_iter([1_i64, 2, 3]),
            sample_dict(),
        ] {
            let mut blob = Vec::new();
            value.encode_into(&mut blob);
            let mut read = blob.as_slice();
            let back = Value::decode(&mut read).unwrap();
            assert!(read.is_empty());
            assert_eq!(back, value);
        }
    }

    #[test]
    fn int_widths_are_minimal() {
        for (v, expected) in [
            (0_i64, 3),
            (127, 3),
            (128, 4),
            (40_000, 6),
            (1 << 40, 10),
        ] {
            let mut blob = Vec::new();
            Value::from(v).encode_into(&mut blob);
            assert_eq!(blob.len(), expected, "value {v}");
        }
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let mut blob = Vec::new();
        Value::from("hello").encode_into(&mut blob);
        blob.truncate(blob.len() - 1);
        let mut read = blob.as_slice();
        assert!(Value::decode(&mut read).is_err());
    }

    #[test]
    fn blob_hash_ignores_none_members() {
        let mut with_none = BTreeMap::new();
        with_none.insert(Value::from("country"), Value::from("CA"));
        with_none.insert(Value::from("ghost"), Value::None);

        let mut without = BTreeMap::new();
        without.insert(Value::from("country"), Value::from("CA"));

        assert_eq!(
            Value::Dict(with_none).blob_hash(),
            Value::Dict(without).blob_hash()
        );
    }

    #[test]
    fn blob_hash_is_kind_sensitive() {
        assert_ne!(Value::from(1_i64).blob_hash(), Value::from(1.0).blob_hash());
        assert_ne!(Value::from(0_i64).blob_hash(), Value::from(false).blob_hash());
    }

    #[test]
    fn ordering_is_total() {
        let mut values = vec![
            Value::from(2.5),
            Value::from("b"),
            Value::None,
            Value::from(1_i64),
            Value::from(true),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(values[0], Value::None);
        assert_eq!(values.last().unwrap(), &Value::from("b"));
    }
}
