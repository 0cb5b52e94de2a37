//! Directory entry name validation.
//!
//! Valid entry names:
//! - Must be non-empty and at most 255 bytes
//! - Must not contain `/` or NUL
//! - Must not be `.` or `..`

use crate::error::{FsError, FsResult};

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Validate one path component.
///
/// ```
/// use strata_fs::names::validate_entry_name;
///
/// assert!(validate_entry_name("notes.txt").is_ok());
/// assert!(validate_entry_name("..").is_err());
/// ```
pub fn validate_entry_name(name: &str) -> FsResult<()> {
    let reason = if name.is_empty() {
        "must not be empty".to_string()
    } else if name.len() > MAX_NAME_LEN {
        format!("longer than {MAX_NAME_LEN} bytes")
    } else if name == "." || name == ".." {
        "reserved name".to_string()
    } else if name.contains('/') {
        "must not contain '/'".to_string()
    } else if name.contains('\0') {
        "must not contain NUL".to_string()
    } else {
        return Ok(());
    };
    Err(FsError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["a", "readme.txt", ".hidden", "with space", "ünïcode", "..."] {
            assert!(validate_entry_name(name).is_ok(), "{name:?}");
        }
        assert!(validate_entry_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        for name in ["", ".", "..", "a/b", "nul\0byte", long.as_str()] {
            assert!(validate_entry_name(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn length_is_measured_in_bytes() {
        // 128 two-byte characters.
        let name = "é".repeat(128);
        assert!(validate_entry_name(&name).is_err());
    }
}
