//! Library rows and the optimistic head pointer.

use std::sync::Arc;

use chrono::Utc;
use strata_store::{Family, ObjectStore, Tables};
use strata_types::{CommitId, LibraryId, LibraryKey, OrgId, StoreConfig};
use tracing::{debug, info};

use crate::commits::CommitLog;
use crate::error::{RefError, Result};
use crate::types::{Library, NewLibrary, StatsDelta};

/// Longest accepted library name, in bytes.
pub const MAX_LIBRARY_NAME_LEN: usize = 255;

/// Library rows in the `Libraries` family, partitioned by org.
///
/// The head moves only through [`update_head`](Self::update_head), a
/// compare-and-set keyed on the commit the caller planned against. A writer
/// that lost the race gets [`RefError::HeadMoved`] and must re-plan.
#[derive(Clone, Debug)]
pub struct LibraryHeads {
    tables: Tables,
    objects: ObjectStore,
    commits: CommitLog,
    config: Arc<StoreConfig>,
}

impl LibraryHeads {
    pub fn new(tables: Tables, config: Arc<StoreConfig>) -> Self {
        Self {
            objects: ObjectStore::new(tables.clone()),
            commits: CommitLog::new(tables.clone()),
            tables,
            config,
        }
    }

    pub fn commits(&self) -> &CommitLog {
        &self.commits
    }

    /// Create a library with an empty root and an initial commit.
    #[tracing::instrument(skip(self, params), fields(%org, name = %params.name))]
    pub async fn create_library(&self, org: &OrgId, params: NewLibrary) -> Result<Library> {
        validate_library_name(&params.name)?;

        let id = LibraryId::new();
        let root = self.objects.put_dir(&id, Vec::new()).await?;
        let commit = self
            .commits
            .create_commit(&id, &params.owner, root, None, "Created library")
            .await?;

        let now = Utc::now();
        let library = Library {
            id,
            org: *org,
            owner: params.owner,
            name: params.name,
            encryption: params.encryption,
            storage_class: params
                .storage_class
                .unwrap_or(self.config.default_storage_class),
            head: commit.id,
            size: 0,
            file_count: 0,
            version_days: params
                .version_days
                .or(self.config.retention.default_version_days),
            created_at: now,
            updated_at: now,
        };
        self.tables
            .insert(Family::Libraries, &org.to_string(), &id.to_string(), &library)
            .await?;
        info!(library = %id, head = %commit.id, "created library");
        Ok(library)
    }

    pub async fn get_library(&self, org: &OrgId, id: &LibraryId) -> Result<Library> {
        self.tables
            .get(Family::Libraries, &org.to_string(), &id.to_string())
            .await?
            .ok_or(RefError::LibraryNotFound(LibraryKey::new(*org, *id)))
    }

    /// All libraries of an org, oldest first.
    pub async fn list_libraries(&self, org: &OrgId) -> Result<Vec<Library>> {
        let rows = self
            .tables
            .scan::<Library>(Family::Libraries, &org.to_string())
            .await?;
        Ok(rows.into_iter().map(|(_, row)| row.into_value()).collect())
    }

    /// Move the head from `expected` to `new` and apply `delta` in the same
    /// row write.
    ///
    /// Fails `HeadMoved` if the head is no longer `expected`. A lost race
    /// against a write that left the head alone (a stats update) is retried.
    #[tracing::instrument(skip(self, delta), fields(%org, %library, %expected, %new))]
    pub async fn update_head(
        &self,
        org: &OrgId,
        library: &LibraryId,
        expected: &CommitId,
        new: &CommitId,
        delta: StatsDelta,
    ) -> Result<Library> {
        let updated = self
            .tables
            .modify::<Library, RefError, _>(
                Family::Libraries,
                &org.to_string(),
                &library.to_string(),
                |lib| {
                    if lib.head != *expected {
                        return Err(RefError::HeadMoved {
                            expected: *expected,
                            actual: lib.head,
                        });
                    }
                    lib.head = *new;
                    delta.apply(lib);
                    lib.updated_at = Utc::now();
                    Ok(true)
                },
            )
            .await?
            .ok_or(RefError::LibraryNotFound(LibraryKey::new(*org, *library)))?;
        debug!("head advanced");
        Ok(updated)
    }

    /// Apply a stats change without touching the head.
    pub async fn adjust_stats(
        &self,
        org: &OrgId,
        library: &LibraryId,
        delta: StatsDelta,
    ) -> Result<Library> {
        self.tables
            .modify::<Library, RefError, _>(
                Family::Libraries,
                &org.to_string(),
                &library.to_string(),
                |lib| {
                    if delta.is_zero() {
                        return Ok(false);
                    }
                    delta.apply(lib);
                    lib.updated_at = Utc::now();
                    Ok(true)
                },
            )
            .await?
            .ok_or(RefError::LibraryNotFound(LibraryKey::new(*org, *library)))
    }
}

/// Validate a library display name.
pub fn validate_library_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        "must not be blank"
    } else if name.len() > MAX_LIBRARY_NAME_LEN {
        "longer than 255 bytes"
    } else if name.contains('/') || name.contains('\0') {
        "must not contain '/' or NUL"
    } else {
        return Ok(());
    };
    Err(RefError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::InMemoryColumnStore;
    use strata_types::{ErrorKind, StorageClass};

    fn heads_with(config: StoreConfig) -> LibraryHeads {
        let tables = Tables::new(Arc::new(InMemoryColumnStore::new()), &config);
        LibraryHeads::new(tables, Arc::new(config))
    }

    fn heads() -> LibraryHeads {
        heads_with(StoreConfig::default())
    }

    #[tokio::test]
    async fn new_library_points_at_empty_root() {
        let heads = heads();
        let org = OrgId::new();
        let lib = heads
            .create_library(&org, NewLibrary::new("alice", "Documents"))
            .await
            .unwrap();

        let commit = heads.commits().get_commit(&lib.id, &lib.head).await.unwrap();
        assert_eq!(commit.root.to_hex(), "f7d1112824ad78dc61e83b6ce8d5c7c35a8f1cc3");
        assert!(commit.parent.is_none());
        assert_eq!(commit.creator, "alice");
        assert_eq!(lib.storage_class, StorageClass::Hot);
        assert_eq!(heads.get_library(&org, &lib.id).await.unwrap(), lib);
    }

    #[tokio::test]
    async fn defaults_come_from_config() {
        let mut config = StoreConfig::default();
        config.default_storage_class = StorageClass::Cold;
        config.retention.default_version_days = Some(30);
        let heads = heads_with(config);
        let lib = heads
            .create_library(&OrgId::new(), NewLibrary::new("a", "b"))
            .await
            .unwrap();
        assert_eq!(lib.storage_class, StorageClass::Cold);
        assert_eq!(lib.version_days, Some(30));
    }

    #[tokio::test]
    async fn list_is_org_scoped() {
        let heads = heads();
        let org = OrgId::new();
        for name in ["one", "two"] {
            heads.create_library(&org, NewLibrary::new("o", name)).await.unwrap();
        }
        heads
            .create_library(&OrgId::new(), NewLibrary::new("o", "elsewhere"))
            .await
            .unwrap();
        let names: Vec<_> = heads
            .list_libraries(&org)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"one".to_string()));
    }

    #[tokio::test]
    async fn stale_head_update_fails() {
        let heads = heads();
        let org = OrgId::new();
        let lib = heads.create_library(&org, NewLibrary::new("a", "lib")).await.unwrap();
        let root = ObjectStore::empty_dir_id();
        let log = heads.commits();

        let first = log.create_commit(&lib.id, "a", root, Some(lib.head), "one").await.unwrap();
        let second = log.create_commit(&lib.id, "b", root, Some(lib.head), "two").await.unwrap();

        let moved = heads
            .update_head(&org, &lib.id, &lib.head, &first.id, StatsDelta::new(10, 1))
            .await
            .unwrap();
        assert_eq!(moved.head, first.id);
        assert_eq!(moved.size, 10);

        let err = heads
            .update_head(&org, &lib.id, &lib.head, &second.id, StatsDelta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RefError::HeadMoved { actual, .. } if actual == first.id));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(heads.get_library(&org, &lib.id).await.unwrap().head, first.id);
    }

    #[tokio::test]
    async fn stats_updates_do_not_block_head() {
        let heads = heads();
        let org = OrgId::new();
        let lib = heads.create_library(&org, NewLibrary::new("a", "lib")).await.unwrap();
        heads
            .adjust_stats(&org, &lib.id, StatsDelta::new(100, 4))
            .await
            .unwrap();

        let next = heads
            .commits()
            .create_commit(&lib.id, "a", ObjectStore::empty_dir_id(), Some(lib.head), "n")
            .await
            .unwrap();
        let updated = heads
            .update_head(&org, &lib.id, &lib.head, &next.id, StatsDelta::new(-40, -1))
            .await
            .unwrap();
        assert_eq!(updated.size, 60);
        assert_eq!(updated.file_count, 3);
    }

    #[tokio::test]
    async fn concurrent_head_updates_have_one_winner() {
        let heads = heads();
        let org = OrgId::new();
        let lib = heads.create_library(&org, NewLibrary::new("a", "lib")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let heads = heads.clone();
            let lib = lib.clone();
            handles.push(tokio::spawn(async move {
                let c = heads
                    .commits()
                    .create_commit(&lib.id, "w", ObjectStore::empty_dir_id(), Some(lib.head), &i.to_string())
                    .await
                    .unwrap();
                heads
                    .update_head(&lib.org, &lib.id, &lib.head, &c.id, StatsDelta::default())
                    .await
            }));
        }
        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(matches!(e, RefError::HeadMoved { .. })),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn unknown_library() {
        let heads = heads();
        let err = heads
            .get_library(&OrgId::new(), &LibraryId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn library_names() {
        assert!(validate_library_name("My Files").is_ok());
        let long = "x".repeat(256);
        for bad in ["", "   ", "a/b", "nul\0", long.as_str()] {
            assert!(validate_library_name(bad).is_err(), "{bad:?}");
        }
    }
}
