//! Archive, group and flat file entities
//!
//! All three levels share one value type, [`CacheEntity`], tagged with a
//! kind marker that fixes the child type. Children are owned by their parent
//! in a map ordered by key; each child's record repeats its parent keys.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::convert::Infallible;
use std::fmt::Debug;
use std::marker::PhantomData;

use js5_crypto::djb2;

use crate::record::{FileIndexRecord, FileKind};

/// Kind markers
pub mod kind {
    /// Top-level archive, parent of groups
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Archive;

    /// Group, parent of flat files
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Group;

    /// Flat file, a leaf
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FlatFile;
}

/// Level of the entity tree
pub trait EntityKind: Debug + Clone + Default {
    /// Kind recorded on the entity's metadata
    const FILE_KIND: FileKind;

    /// Whether the child count is part of change detection
    const HAS_CHILDREN: bool;

    /// Child entity type
    type Child: Debug + Clone;
}

impl EntityKind for kind::Archive {
    const FILE_KIND: FileKind = FileKind::Archive;
    const HAS_CHILDREN: bool = true;
    type Child = Group;
}

impl EntityKind for kind::Group {
    const FILE_KIND: FileKind = FileKind::Group;
    const HAS_CHILDREN: bool = true;
    type Child = FlatFile;
}

impl EntityKind for kind::FlatFile {
    const FILE_KIND: FileKind = FileKind::File;
    const HAS_CHILDREN: bool = false;
    type Child = Infallible;
}

/// Archive entity
pub type Archive = CacheEntity<kind::Archive>;

/// Group entity
pub type Group = CacheEntity<kind::Group>;

/// Flat file entity
pub type FlatFile = CacheEntity<kind::FlatFile>;

/// Child lookup by key or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Numeric key
    ById(u32),
    /// Name, matched against names and name hashes
    ByName(String),
}

impl From<u32> for Key {
    fn from(key: u32) -> Self {
        Self::ById(key)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::ByName(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::ByName(name)
    }
}

/// One unit of the cache with its metadata and bytes
#[derive(Debug, Clone)]
pub struct CacheEntity<K: EntityKind> {
    /// Index metadata
    pub record: FileIndexRecord,
    /// Decompressed bytes
    pub data: Option<Vec<u8>>,
    /// Stored envelope bytes
    pub compressed: Option<Vec<u8>>,
    /// Children by key
    pub children: BTreeMap<u32, K::Child>,
    kind: PhantomData<K>,
}

impl<K: EntityKind> CacheEntity<K> {
    fn with_record(record: FileIndexRecord) -> Self {
        Self {
            record,
            data: None,
            compressed: None,
            children: BTreeMap::new(),
            kind: PhantomData,
        }
    }

    /// Key within the parent
    pub fn key(&self) -> u32 {
        self.record.key
    }

    /// Resolved name
    pub fn name(&self) -> Option<&str> {
        self.record.name.as_deref()
    }

    /// Set the name and its hash
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.record.name_hash = Some(djb2(&name));
        self.record.name = Some(name);
    }

    /// Whether a lookup key refers to this entity
    pub fn matches(&self, key: &Key) -> bool {
        match key {
            Key::ById(id) => self.record.key == *id,
            Key::ByName(name) => {
                self.record.name.as_deref() == Some(name.as_str())
                    || self.record.name_hash == Some(djb2(name))
            }
        }
    }

    /// Replace the decompressed bytes
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }
}

/// Child collection access shared by archives and groups
macro_rules! impl_children {
    ($kind:ty) => {
        impl CacheEntity<$kind> {
            /// Resolve a lookup key to the key of an existing child
            pub fn resolve(&self, key: &Key) -> Option<u32> {
                match key {
                    Key::ById(id) => self.children.contains_key(id).then_some(*id),
                    Key::ByName(_) => self
                        .children
                        .values()
                        .find(|child| child.matches(key))
                        .map(CacheEntity::key),
                }
            }

            /// Child by key or name
            pub fn child(&self, key: &Key) -> Option<&<$kind as EntityKind>::Child> {
                let id = self.resolve(key)?;
                self.children.get(&id)
            }

            /// Mutable child by key or name
            pub fn child_mut(&mut self, key: &Key) -> Option<&mut <$kind as EntityKind>::Child> {
                let id = self.resolve(key)?;
                self.children.get_mut(&id)
            }
        }
    };
}

impl_children!(kind::Archive);
impl_children!(kind::Group);

impl Archive {
    /// Create an empty archive
    pub fn new(game_build: u32, key: u32) -> Self {
        Self::with_record(FileIndexRecord::new(
            FileKind::Archive,
            game_build,
            key,
            0,
            key,
        ))
    }

    /// Add or replace an empty group, returning it
    pub fn add_group(&mut self, key: u32) -> &mut Group {
        let group = Group::new(self.record.game_build, self.record.key, key);
        replace_child(&mut self.children, key, group)
    }
}

impl Group {
    /// Create an empty group of an archive
    pub fn new(game_build: u32, archive_key: u32, key: u32) -> Self {
        Self::with_record(FileIndexRecord::new(
            FileKind::Group,
            game_build,
            archive_key,
            key,
            key,
        ))
    }

    /// Add or replace an empty file, returning it
    pub fn add_file(&mut self, key: u32) -> &mut FlatFile {
        let file = FlatFile::new(
            self.record.game_build,
            self.record.archive_key,
            self.record.key,
            key,
        );
        replace_child(&mut self.children, key, file)
    }
}

impl FlatFile {
    /// Create an empty file of a group
    pub fn new(game_build: u32, archive_key: u32, group_key: u32, key: u32) -> Self {
        Self::with_record(FileIndexRecord::new(
            FileKind::File,
            game_build,
            archive_key,
            group_key,
            key,
        ))
    }
}

fn replace_child<C>(children: &mut BTreeMap<u32, C>, key: u32, child: C) -> &mut C {
    match children.entry(key) {
        Entry::Occupied(mut entry) => {
            entry.insert(child);
            entry.into_mut()
        }
        Entry::Vacant(entry) => entry.insert(child),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_keys_follow_the_tree() {
        let mut archive = Archive::new(435, 5);
        let group = archive.add_group(12);
        assert_eq!(group.record.archive_key, 5);
        assert_eq!(group.record.file_type, FileKind::Group);

        let file = group.add_file(3);
        assert_eq!(file.record.archive_key, 5);
        assert_eq!(file.record.group_key, 12);
        assert_eq!(file.record.game_build, 435);
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let mut archive = Archive::new(1, 5);
        archive.add_group(0).set_name("m50_50");
        archive.add_group(1).record.name_hash = Some(djb2("l50_50"));

        assert_eq!(archive.resolve(&Key::from(1)), Some(1));
        assert_eq!(archive.resolve(&Key::from(7)), None);
        assert_eq!(archive.resolve(&Key::from("m50_50")), Some(0));
        // Matched through the hash alone
        assert_eq!(archive.resolve(&Key::from("l50_50")), Some(1));
        assert_eq!(archive.resolve(&Key::from("unknown")), None);

        archive
            .child_mut(&Key::from("m50_50"))
            .unwrap()
            .set_data(b"payload".to_vec());
        assert_eq!(
            archive.child(&Key::ById(0)).unwrap().data.as_deref(),
            Some(b"payload".as_slice())
        );
    }

    #[test]
    fn test_add_replaces_existing_child() {
        let mut group = Group::new(1, 2, 3);
        group.add_file(0).set_data(vec![1, 2, 3]);
        assert!(group.add_file(0).data.is_none());
        assert_eq!(group.children.len(), 1);
    }
}
