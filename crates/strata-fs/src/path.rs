//! Normalized library paths.

use std::fmt;
use std::str::FromStr;

use crate::error::{FsError, FsResult};
use crate::names::validate_entry_name;

/// An absolute, normalized path inside a library.
///
/// Parsing splits on `/` and drops empty segments, so `"//a///b/"` is
/// `/a/b`. The root is the path with no segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsPath {
    segments: Vec<String>,
}

impl FsPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> FsResult<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            validate_entry_name(segment).map_err(|e| FsError::InvalidPath {
                path: raw.to_string(),
                reason: match e {
                    FsError::InvalidName { name, reason } => format!("segment {name:?} {reason}"),
                    other => other.to_string(),
                },
            })?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The containing directory; `None` for the root.
    pub fn parent(&self) -> Option<FsPath> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> FsResult<FsPath> {
        validate_entry_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Whether `self` is `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &FsPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// The first `n` segments.
    pub fn prefix(&self, n: usize) -> FsPath {
        Self {
            segments: self.segments[..n.min(self.segments.len())].to_vec(),
        }
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FsPath {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    #[test]
    fn empty_segments_collapse() {
        assert_eq!(p("//a///b/").segments(), ["a", "b"]);
        assert_eq!(p("a/b"), p("/a/b"));
        assert!(p("/").is_root());
        assert!(p("").is_root());
        assert_eq!(p("///").to_string(), "/");
    }

    #[test]
    fn dot_segments_are_rejected() {
        for raw in ["/a/./b", "/a/../b", "..", "/."] {
            let err = FsPath::parse(raw).unwrap_err();
            assert!(matches!(err, FsError::InvalidPath { .. }), "{raw}");
        }
        assert!(FsPath::parse("/a/\0").is_err());
    }

    #[test]
    fn parent_name_and_prefix() {
        let path = p("/docs/2024/report.pdf");
        assert_eq!(path.name(), Some("report.pdf"));
        assert_eq!(path.parent().unwrap().to_string(), "/docs/2024");
        assert_eq!(path.prefix(1).to_string(), "/docs");
        assert!(FsPath::root().parent().is_none());
        assert!(FsPath::root().name().is_none());
    }

    #[test]
    fn subtree_checks() {
        let a = p("/a");
        assert!(p("/a/b").starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!p("/ab").starts_with(&a));
        assert!(a.starts_with(&FsPath::root()));
    }

    #[test]
    fn join_validates() {
        assert_eq!(p("/a").join("b").unwrap().to_string(), "/a/b");
        assert!(p("/a").join("..").is_err());
    }

    proptest! {
        #[test]
        fn display_round_trips(segments in proptest::collection::vec("[a-z0-9_.-]{1,8}", 0..6)) {
            prop_assume!(segments.iter().all(|s| s != "." && s != ".."));
            let path = FsPath::parse(&segments.join("/")).unwrap();
            prop_assert_eq!(FsPath::parse(&path.to_string()).unwrap(), path);
        }
    }
}
