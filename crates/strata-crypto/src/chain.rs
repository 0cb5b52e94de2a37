use strata_types::CommitId;

/// A record that links to its predecessor by id.
pub trait HasParent {
    /// The record's own id.
    fn id(&self) -> CommitId;
    /// The predecessor's id (None for the first record).
    fn parent(&self) -> Option<CommitId>;
}

/// Verifies that a newest-first slice of records forms one linear chain.
///
/// Commit ids are salted rather than content hashes, so verification checks
/// linkage only: every record's parent must be the next record in the slice,
/// and no id may repeat.
pub struct LineageVerifier;

impl LineageVerifier {
    /// Verify a newest-first chain.
    ///
    /// When `complete` is true the last record must be a root (no parent);
    /// otherwise the slice may be a truncated window of a longer history.
    pub fn verify(records: &[impl HasParent], complete: bool) -> Result<(), ChainError> {
        let mut seen = std::collections::HashSet::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            if !seen.insert(record.id()) {
                return Err(ChainError::Cycle { index });
            }
            match (record.parent(), records.get(index + 1)) {
                (Some(parent), Some(next)) if parent == next.id() => {}
                (Some(_), Some(_)) => return Err(ChainError::BrokenLink { index }),
                (None, Some(_)) => return Err(ChainError::UnexpectedRoot { index }),
                (Some(_), None) if complete => return Err(ChainError::MissingRoot),
                (Some(_), None) | (None, None) => {}
            }
        }

        Ok(())
    }
}

/// Errors from lineage verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("broken link at index {index}: parent does not match the next record")]
    BrokenLink { index: usize },

    #[error("record at index {index} has no parent but older records follow")]
    UnexpectedRoot { index: usize },

    #[error("id repeats at index {index}")]
    Cycle { index: usize },

    #[error("chain does not end at a root record")]
    MissingRoot,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCommit {
        id: CommitId,
        parent: Option<CommitId>,
    }

    impl HasParent for TestCommit {
        fn id(&self) -> CommitId {
            self.id
        }
        fn parent(&self) -> Option<CommitId> {
            self.parent
        }
    }

    fn id(n: u8) -> CommitId {
        CommitId::from_hash([n; 20])
    }

    /// Newest-first chain n-1 -> ... -> 0.
    fn build_chain(count: u8) -> Vec<TestCommit> {
        (0..count)
            .rev()
            .map(|n| TestCommit {
                id: id(n),
                parent: n.checked_sub(1).map(id),
            })
            .collect()
    }

    #[test]
    fn empty_chain_is_valid() {
        let chain: Vec<TestCommit> = vec![];
        assert!(LineageVerifier::verify(&chain, true).is_ok());
    }

    #[test]
    fn complete_chain_is_valid() {
        assert!(LineageVerifier::verify(&build_chain(5), true).is_ok());
    }

    #[test]
    fn truncated_window_allowed_when_incomplete() {
        let chain = build_chain(5);
        assert!(LineageVerifier::verify(&chain[..3], false).is_ok());
        assert_eq!(
            LineageVerifier::verify(&chain[..3], true).unwrap_err(),
            ChainError::MissingRoot
        );
    }

    #[test]
    fn broken_link_detected() {
        let mut chain = build_chain(3);
        chain[0].parent = Some(id(99));
        assert_eq!(
            LineageVerifier::verify(&chain, true).unwrap_err(),
            ChainError::BrokenLink { index: 0 }
        );
    }

    #[test]
    fn early_root_detected() {
        let mut chain = build_chain(3);
        chain[1].parent = None;
        assert_eq!(
            LineageVerifier::verify(&chain, true).unwrap_err(),
            ChainError::UnexpectedRoot { index: 1 }
        );
    }

    #[test]
    fn repeated_id_detected() {
        let chain = vec![
            TestCommit { id: id(1), parent: Some(id(1)) },
            TestCommit { id: id(1), parent: None },
        ];
        assert_eq!(
            LineageVerifier::verify(&chain, true).unwrap_err(),
            ChainError::Cycle { index: 1 }
        );
    }
}
