//! Edits on a sorted directory entry list.
//!
//! Entry lists come from [`Directory::into_entries`](strata_store::Directory)
//! already sorted by name. Every primitive here keeps them sorted.

use strata_store::DirEntry;

use crate::error::{FsError, FsResult};

fn position(entries: &[DirEntry], name: &str) -> Result<usize, usize> {
    entries.binary_search_by(|e| e.name.as_str().cmp(name))
}

pub fn find_entry<'a>(entries: &'a [DirEntry], name: &str) -> Option<&'a DirEntry> {
    position(entries, name).ok().map(|i| &entries[i])
}

/// Insert `entry`. Fails if the name is taken.
pub fn add_entry(entries: &mut Vec<DirEntry>, entry: DirEntry) -> FsResult<()> {
    match position(entries, &entry.name) {
        Ok(_) => Err(FsError::AlreadyExists(entry.name)),
        Err(i) => {
            entries.insert(i, entry);
            Ok(())
        }
    }
}

/// Remove and return the entry called `name`, if any.
pub fn remove_entry(entries: &mut Vec<DirEntry>, name: &str) -> Option<DirEntry> {
    position(entries, name).ok().map(|i| entries.remove(i))
}

/// Rename `old` to `new` in place, keeping id, mode, size and mtime.
pub fn update_entry(entries: &mut Vec<DirEntry>, old: &str, new: &str) -> FsResult<DirEntry> {
    if old == new {
        return find_entry(entries, old)
            .cloned()
            .ok_or_else(|| FsError::NotFound(old.to_string()));
    }
    if find_entry(entries, new).is_some() {
        return Err(FsError::AlreadyExists(new.to_string()));
    }
    let mut entry = remove_entry(entries, old).ok_or_else(|| FsError::NotFound(old.to_string()))?;
    entry.name = new.to_string();
    add_entry(entries, entry.clone())?;
    Ok(entry)
}

/// Point the entry called `name` at a rebuilt child.
pub(crate) fn relink_entry(
    entries: &mut [DirEntry],
    name: &str,
    id: strata_types::NodeId,
    mtime: i64,
) -> FsResult<()> {
    let i = position(entries, name).map_err(|_| FsError::BrokenChain(name.to_string()))?;
    entries[i].id = id;
    entries[i].mtime = mtime;
    Ok(())
}
