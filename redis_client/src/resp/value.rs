//! The tagged RESP value tree (component A of the design). A single tree
//! type is shared by the parser and by user-facing replies so that a value
//! read off the wire and a value built by hand compare equal and serialize
//! identically.
use crate::error::{ClientError, ClientErrorKind, ClientResult};
use std::fmt;

/// A single RESP2/RESP3 value.
///
/// `Clone` is the deep copy required by the design: container variants hold
/// owned children, so cloning a `Value` never shares a buffer with its
/// source.
#[derive(Debug, Clone)]
pub enum Value {
    SimpleString(Vec<u8>),
    Error(Vec<u8>),
    BlobError(Vec<u8>),
    BulkString(Vec<u8>),
    /// Raw wire payload, including the 3-byte format code and the `:`
    /// separator (e.g. `txt:some text`). Use [`Value::split_text`] to pull
    /// the format code apart from the text.
    VerbatimString(Vec<u8>),
    /// Decimal digits of a big number, as they appeared on the wire.
    BigNumber(Vec<u8>),
    Integer(i64),
    Boolean(bool),
    Double(f64),
    Null,
    Array(Vec<Value>),
    Set(Vec<Value>),
    /// RESP3 out-of-band push message.
    Push(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// RESP3 attribute frame; annotates the reply that follows it.
    Attribute(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::Boolean(_) | Value::Double(_) | Value::Null
        )
    }

    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Value::SimpleString(_)
                | Value::Error(_)
                | Value::BulkString(_)
                | Value::VerbatimString(_)
                | Value::BlobError(_)
                | Value::BigNumber(_)
        )
    }

    pub fn is_array_like(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Set(_) | Value::Push(_))
    }

    pub fn is_map_like(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Attribute(_))
    }

    pub fn has_components(&self) -> bool {
        self.is_array_like() || self.is_map_like()
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_) | Value::BlobError(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Raw payload bytes of any string-like variant.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::SimpleString(b)
            | Value::Error(b)
            | Value::BulkString(b)
            | Value::VerbatimString(b)
            | Value::BlobError(b)
            | Value::BigNumber(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::Set(v) | Value::Push(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(v) | Value::Attribute(v) => Some(v),
            _ => None,
        }
    }

    /// Appends the contents of `other` onto `self`, consuming it. Used to
    /// consolidate streamed aggregate chunks (tag `;`) into a single value.
    ///
    /// Fails with `UnexpectedResp` if the two values are different
    /// container kinds, and with `Null` (repurposed here as "invalid
    /// target") if `self` is not a container at all.
    pub fn append(&mut self, other: Value) -> ClientResult<()> {
        match (self, other) {
            (Value::Array(dst), Value::Array(mut src)) => Ok(dst.append(&mut src)),
            (Value::Set(dst), Value::Set(mut src)) => Ok(dst.append(&mut src)),
            (Value::Push(dst), Value::Push(mut src)) => Ok(dst.append(&mut src)),
            (Value::Map(dst), Value::Map(mut src)) => Ok(dst.append(&mut src)),
            (Value::Attribute(dst), Value::Attribute(mut src)) => Ok(dst.append(&mut src)),
            (dst, _) if !dst.has_components() => Err(ClientError::new(
                ClientErrorKind::SizeInvalid,
                "cannot append to a scalar or string-like value",
            )),
            _ => Err(ClientError::new(
                ClientErrorKind::UnexpectedResp,
                "cannot append values of different container kinds",
            )),
        }
    }

    /// Looks a value up in a map/attribute by structural key equality.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Looks a value up in a map/attribute by a literal string key; only
    /// matches string-like keys.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_bytes() == Some(key.as_bytes()))
            .map(|(_, v)| v)
    }

    /// Splits the leading code/category token off an error or verbatim
    /// string from the remainder of its payload.
    ///
    /// For errors, the token is everything before the first whitespace
    /// byte (e.g. `MOVED` in `MOVED 3999 127.0.0.1:6381`). For verbatim
    /// strings, the token is the fixed 3-byte format code that precedes the
    /// `:` separator.
    pub fn split_text(&self) -> Option<(&[u8], &[u8])> {
        match self {
            Value::Error(b) | Value::BlobError(b) => {
                let pos = b.iter().position(|&c| c == b' ')?;
                Some((&b[..pos], &b[pos + 1..]))
            }
            Value::VerbatimString(b) => {
                if b.len() >= 4 && b[3] == b':' {
                    Some((&b[..3], &b[4..]))
                } else {
                    Some((&b[..], &[]))
                }
            }
            _ => None,
        }
    }

    pub fn bulk_string(bytes: impl Into<Vec<u8>>) -> Value {
        Value::BulkString(bytes.into())
    }

    pub fn simple_string(bytes: impl Into<Vec<u8>>) -> Value {
        Value::SimpleString(bytes.into())
    }

    pub fn error(code: &str, message: &str) -> Value {
        Value::Error(format!("{code} {message}").into_bytes())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::SimpleString(a), Value::SimpleString(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::BlobError(a), Value::BlobError(b)) => a == b,
            (Value::BulkString(a), Value::BulkString(b)) => a == b,
            (Value::VerbatimString(a), Value::VerbatimString(b)) => a == b,
            (Value::BigNumber(a), Value::BigNumber(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Push(a), Value::Push(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Attribute(a), Value::Attribute(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::SimpleString(b) | Value::BulkString(b) => {
                write!(f, "{}", String::from_utf8_lossy(b))
            }
            Value::VerbatimString(b) => match self.split_text() {
                Some((_, text)) => write!(f, "{}", String::from_utf8_lossy(text)),
                None => write!(f, "{}", String::from_utf8_lossy(b)),
            },
            Value::Error(b) | Value::BlobError(b) => {
                write!(f, "(error) {}", String::from_utf8_lossy(b))
            }
            Value::BigNumber(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Null => write!(f, "(nil)"),
            Value::Array(v) | Value::Set(v) | Value::Push(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(v) | Value::Attribute(v) => {
                write!(f, "{{")?;
                for (i, (k, val)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {val}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_predicates() {
        assert!(Value::Integer(1).is_scalar());
        assert!(Value::Boolean(true).is_scalar());
        assert!(Value::Null.is_scalar());
        assert!(!Value::BulkString(vec![]).is_scalar());
    }

    #[test]
    fn string_like_predicates() {
        assert!(Value::BulkString(b"x".to_vec()).is_string_like());
        assert!(Value::SimpleString(b"x".to_vec()).is_string_like());
        assert!(!Value::Array(vec![]).is_string_like());
    }

    #[test]
    fn deep_copy_shares_nothing() {
        let mut original = Value::Array(vec![Value::BulkString(b"a".to_vec())]);
        let copy = original.clone();
        if let Value::Array(v) = &mut original {
            v.push(Value::BulkString(b"b".to_vec()));
        }
        assert_eq!(copy, Value::Array(vec![Value::BulkString(b"a".to_vec())]));
    }

    #[test]
    fn append_merges_same_container_kind() {
        let mut a = Value::Array(vec![Value::Integer(1)]);
        let b = Value::Array(vec![Value::Integer(2)]);
        a.append(b).unwrap();
        assert_eq!(a, Value::Array(vec![Value::Integer(1), Value::Integer(2)]));
    }

    #[test]
    fn append_rejects_scalar_target() {
        let mut a = Value::Integer(1);
        let err = a.append(Value::Integer(2)).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::SizeInvalid);
    }

    #[test]
    fn append_rejects_mismatched_containers() {
        let mut a = Value::Array(vec![]);
        let err = a.append(Value::Set(vec![])).unwrap_err();
        assert_eq!(err.kind(), ClientErrorKind::UnexpectedResp);
    }

    #[test]
    fn split_text_error_separates_code_from_message() {
        let v = Value::Error(b"MOVED 3999 127.0.0.1:6381".to_vec());
        let (code, rest) = v.split_text().unwrap();
        assert_eq!(code, b"MOVED");
        assert_eq!(rest, b"3999 127.0.0.1:6381");
    }

    #[test]
    fn split_text_verbatim_separates_format_from_text() {
        let v = Value::VerbatimString(b"txt:Some string".to_vec());
        let (fmt, text) = v.split_text().unwrap();
        assert_eq!(fmt, b"txt");
        assert_eq!(text, b"Some string");
    }

    #[test]
    fn map_lookup_by_string_key() {
        let m = Value::Map(vec![(
            Value::BulkString(b"role".to_vec()),
            Value::BulkString(b"master".to_vec()),
        )]);
        assert_eq!(m.get_str("role"), Some(&Value::BulkString(b"master".to_vec())));
        assert_eq!(m.get_str("missing"), None);
    }
}
