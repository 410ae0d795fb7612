//! Owned payloads moved between the consumer and worker threads

use crate::error::{BplusError, Result};
use std::fmt;
use std::ops::Deref;

macro_rules! byte_buffer {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(Vec<u8>);

        impl $name {
            pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            /// Copy engine-owned bytes into an owned buffer
            pub fn copy_from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn into_vec(self) -> Vec<u8> {
                self.0
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &[u8] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<Vec<u8>> for $name {
            fn from(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }
        }

        impl From<&[u8]> for $name {
            fn from(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }
        }

        impl<const N: usize> From<&[u8; N]> for $name {
            fn from(bytes: &[u8; N]) -> Self {
                Self(bytes.to_vec())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.as_bytes().to_vec())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s.into_bytes())
            }
        }

        impl From<$name> for Vec<u8> {
            fn from(buf: $name) -> Self {
                buf.0
            }
        }

        impl PartialEq<[u8]> for $name {
            fn eq(&self, other: &[u8]) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&[u8]> for $name {
            fn eq(&self, other: &&[u8]) -> bool {
                self.0 == *other
            }
        }

        impl<const N: usize> PartialEq<&[u8; N]> for $name {
            fn eq(&self, other: &&[u8; N]) -> bool {
                self.0 == other[..]
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match std::str::from_utf8(&self.0) {
                    Ok(s) => write!(f, "{}({:?})", stringify!($name), s),
                    Err(_) => write!(f, "{}({:?})", stringify!($name), self.0),
                }
            }
        }
    };
}

byte_buffer!(
    /// Key bytes. Engines reject empty keys, so the store validates them
    /// before a task is submitted.
    Key
);

byte_buffer!(
    /// Value bytes
    Value
);

impl Key {
    /// Reject empty keys at the call site
    pub fn validate(&self, what: &str) -> Result<()> {
        if self.0.is_empty() {
            return Err(BplusError::InvalidArgument(format!("{} must not be empty", what)));
        }
        Ok(())
    }
}

/// Handle to one stored version of a value.
///
/// Refs are fixed-size (8 bytes, big-endian on the wire) and are only
/// meaningful to the engine that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueRef(u64);

impl ValueRef {
    pub const SIZE: usize = 8;

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_be_bytes()
    }

    /// Parse a raw ref, rejecting anything that is not exactly 8 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; Self::SIZE] = bytes.try_into().map_err(|_| {
            BplusError::InvalidArgument(format!(
                "value ref must be {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(u64::from_be_bytes(raw)))
    }
}

/// A value together with the ref of the version it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRecord {
    pub value: Value,
    pub reference: ValueRef,
}

/// One key/value pair produced by a range scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
    pub reference: ValueRef,
}

impl Record {
    /// Copy a record out of engine-owned buffers
    pub fn copy_from(key: &[u8], value: &[u8], reference: ValueRef) -> Self {
        Self {
            key: Key::copy_from(key),
            value: Value::copy_from(value),
            reference,
        }
    }
}

/// Answer of a decision callback.
///
/// Anything except an explicit reject means "continue": `true`, `()` and
/// `None` all convert to [`Decision::Accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Accept,
    Reject,
}

impl Decision {
    pub fn is_accept(self) -> bool {
        self == Decision::Accept
    }
}

impl From<bool> for Decision {
    fn from(accept: bool) -> Self {
        if accept {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }
}

impl From<()> for Decision {
    fn from(_: ()) -> Self {
        Decision::Accept
    }
}

impl From<Option<bool>> for Decision {
    fn from(answer: Option<bool>) -> Self {
        answer.map(Decision::from).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_bytes_sort_like_numbers() {
        let a = ValueRef::new(100).to_bytes();
        let b = ValueRef::new(200).to_bytes();
        assert!(a < b);
        assert_eq!(ValueRef::from_bytes(&b).unwrap(), ValueRef::new(200));
    }

    #[test]
    fn test_ref_wrong_length_rejected() {
        let err = ValueRef::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, BplusError::InvalidArgument(_)));
    }

    #[test]
    fn test_decision_defaults_to_continue() {
        assert_eq!(Decision::from(true), Decision::Accept);
        assert_eq!(Decision::from(false), Decision::Reject);
        assert_eq!(Decision::from(()), Decision::Accept);
        assert_eq!(Decision::from(None::<bool>), Decision::Accept);
        assert_eq!(Decision::from(Some(false)), Decision::Reject);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(Key::from("").validate("key").is_err());
        assert!(Key::from("k").validate("key").is_ok());
    }

    #[test]
    fn test_key_conversions() {
        assert_eq!(Key::from("abc"), Key::from(b"abc"));
        assert_eq!(Value::from(String::from("v")), b"v");
        assert_eq!(format!("{:?}", Key::from("a")), "Key(\"a\")");
    }
}
