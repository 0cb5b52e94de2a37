use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Defines a fixed-width, content-derived identifier that travels as
/// lowercase hex on the wire.
macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length of the raw digest in bytes.
            pub const LEN: usize = $len;

            /// Create from a pre-computed digest.
            pub const fn from_hash(hash: [u8; $len]) -> Self {
                Self(hash)
            }

            /// The raw digest bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Lowercase hex encoding (the protocol form).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// First 8 hex characters, for logs.
            pub fn short_hex(&self) -> String {
                hex::encode(&self.0[..4])
            }

            /// Parse from lowercase hex. Uppercase is rejected because the
            /// desktop client compares ids byte-for-byte.
            pub fn from_hex(s: &str) -> Result<Self, TypeError> {
                if s.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(TypeError::NotLowercase(s.to_string()));
                }
                let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
                if bytes.len() != $len {
                    return Err(TypeError::InvalidLength {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// Content-addressed identifier of a directory or file node.
    ///
    /// A SHA-1 digest over the node's canonical form, rendered as 40
    /// lowercase hex characters.
    NodeId,
    20
);

hex_id!(
    /// Identifier of a commit. SHA-1 sized (40 hex characters) but salted,
    /// so it is not a pure function of the committed tree.
    CommitId,
    20
);

hex_id!(
    /// Content-addressed identifier of a block: the SHA-256 of its bytes,
    /// rendered as 64 lowercase hex characters.
    BlockId,
    32
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_hex_is_40_chars() {
        let id = NodeId::from_hash([0xab; 20]);
        assert_eq!(id.to_hex().len(), 40);
        assert_eq!(id.to_string(), "ab".repeat(20));
    }

    #[test]
    fn block_id_hex_is_64_chars() {
        let id = BlockId::from_hash([0x01; 32]);
        assert_eq!(id.to_hex().len(), 64);
    }

    #[test]
    fn rejects_uppercase() {
        let err = NodeId::from_hex(&"AB".repeat(20)).unwrap_err();
        assert!(matches!(err, TypeError::NotLowercase(_)));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = NodeId::from_hex(&"ab".repeat(32)).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 20,
                actual: 32
            }
        );
        assert!(BlockId::from_hex(&"ab".repeat(20)).is_err());
    }

    #[test]
    fn serializes_as_plain_hex_string() {
        let id = CommitId::from_hash([0x0f; 20]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "0f".repeat(20)));
        let back: CommitId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn debug_uses_short_hex() {
        let id = BlockId::from_hash([0xcd; 32]);
        assert_eq!(format!("{id:?}"), "BlockId(cdcdcdcd)");
    }

    #[test]
    fn parse_via_from_str() {
        let hex = "00".repeat(19) + "01";
        let id: NodeId = hex.parse().unwrap();
        assert_eq!(id.as_bytes()[19], 1);
    }
}
