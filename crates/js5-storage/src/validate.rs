//! Change detection
//!
//! Checksums, digests and sizes are recomputed from an entity's live bytes
//! and compared with its record. Any difference bumps the version once.

use sha2::{Digest, Sha256};

use crate::entity::{CacheEntity, EntityKind};
use crate::name_table::NameTable;
use crate::record::ABSENT_CHECKSUM;

/// Checksum, digest and size of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// CRC-32, or -1 without bytes
    pub checksum: i32,
    /// SHA-256, absent without bytes
    pub digest: Option<[u8; 32]>,
    /// Length in bytes
    pub size: u32,
}

impl Fingerprint {
    /// Fingerprint a buffer that may be absent
    pub fn of(data: Option<&[u8]>) -> Self {
        match data {
            Some(data) => Self {
                checksum: crc32fast::hash(data) as i32,
                digest: Some(Sha256::digest(data).into()),
                size: data.len() as u32,
            },
            None => Self {
                checksum: ABSENT_CHECKSUM,
                digest: None,
                size: 0,
            },
        }
    }
}

/// Refresh an entity's derived metadata
///
/// Returns whether anything changed. With `track_changes` the version is
/// incremented by one when it did.
pub fn validate<K: EntityKind>(
    entity: &mut CacheEntity<K>,
    names: &dyn NameTable,
    track_changes: bool,
) -> bool {
    let raw = Fingerprint::of(entity.data.as_deref());
    let stored = Fingerprint::of(entity.compressed.as_deref());
    let record = &mut entity.record;

    if let Some(name) = &record.name {
        if record.name_hash.is_none() {
            record.name_hash = Some(names.hash_for(name));
        }
    } else if let Some(hash) = record.name_hash {
        record.name = names.name_for(hash);
    }

    let mut modified = false;
    modified |= update(&mut record.checksum, raw.checksum);
    modified |= update(&mut record.sha_digest, raw.digest);
    modified |= update(&mut record.file_size, raw.size);
    modified |= update(&mut record.compressed_checksum, stored.checksum);
    modified |= update(&mut record.compressed_sha_digest, stored.digest);
    modified |= update(&mut record.compressed_file_size, stored.size);

    if K::HAS_CHILDREN {
        modified |= update(&mut record.child_count, entity.children.len() as u32);
    }

    if modified && track_changes {
        record.version = record.version.wrapping_add(1);
    }
    modified
}

fn update<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}
