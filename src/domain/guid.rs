//! Pool and vdev identity types
//!
//! GUIDs are 64-bit values assigned by the storage layer. A vdev GUID is only
//! unique within its pool, so cases are addressed by the pair.

use serde::{Deserialize, Serialize};

/// Parse a GUID the way the kernel formats them in event and label text.
///
/// Accepts decimal, `0x`-prefixed hex and `0`-prefixed octal. Zero is the
/// storage layer's "invalid GUID" and maps to `None`, as does anything that
/// fails to parse.
pub fn parse_guid(text: &str) -> Option<u64> {
    let text = text.trim();
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()?
    } else {
        text.parse::<u64>().ok()?
    };
    (value != 0).then_some(value)
}

macro_rules! guid_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Parse from event or label text, `None` when absent or zero
            pub fn parse(text: &str) -> Option<Self> {
                parse_guid(text).map(Self)
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

guid_type!(
    /// Globally unique identifier of a storage pool
    PoolGuid
);

guid_type!(
    /// Identifier of a vdev, unique within its pool
    VdevGuid
);

/// Address of one device slot across the system's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseKey {
    pub pool_guid: PoolGuid,
    pub vdev_guid: VdevGuid,
}

impl CaseKey {
    pub fn new(pool_guid: PoolGuid, vdev_guid: VdevGuid) -> Self {
        Self {
            pool_guid,
            vdev_guid,
        }
    }
}

impl std::fmt::Display for CaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pool_guid, self.vdev_guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_guid_radix() {
        assert_eq!(parse_guid("42"), Some(42));
        assert_eq!(parse_guid("0x2a"), Some(42));
        assert_eq!(parse_guid("052"), Some(42));
        assert_eq!(parse_guid(" 18446744073709551615 "), Some(u64::MAX));
    }

    #[test]
    fn test_parse_guid_invalid() {
        assert_eq!(parse_guid(""), None);
        assert_eq!(parse_guid("0"), None);
        assert_eq!(parse_guid("tank"), None);
        assert_eq!(parse_guid("0x"), None);
    }

    #[test]
    fn test_case_key_display() {
        let key = CaseKey::new(PoolGuid::new(42), VdevGuid::new(7));
        assert_eq!(key.to_string(), "42:7");
        assert_eq!(PoolGuid::parse("0x2a"), Some(PoolGuid(42)));
    }
}
