use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Storage tier a block lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    /// Low-latency tier for recently written or frequently read blocks.
    Hot,
    /// Infrequent-access tier. Directly readable.
    Cold,
    /// Archival tier. Reads require an asynchronous restore first.
    Archive,
}

impl StorageClass {
    pub const ALL: [StorageClass; 3] = [Self::Hot, Self::Cold, Self::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Cold => "cold",
            Self::Archive => "archive",
        }
    }
}

impl Default for StorageClass {
    fn default() -> Self {
        Self::Hot
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Self::Hot),
            "cold" => Ok(Self::Cold),
            "archive" | "glacier" => Ok(Self::Archive),
            other => Err(TypeError::UnknownStorageClass(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        for class in StorageClass::ALL {
            assert_eq!(class.as_str().parse::<StorageClass>().unwrap(), class);
        }
    }

    #[test]
    fn glacier_alias() {
        assert_eq!("glacier".parse::<StorageClass>().unwrap(), StorageClass::Archive);
    }

    #[test]
    fn unknown_class() {
        let err = "tape".parse::<StorageClass>().unwrap_err();
        assert_eq!(err, TypeError::UnknownStorageClass("tape".into()));
    }
}
