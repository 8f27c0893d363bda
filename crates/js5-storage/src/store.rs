//! Cache orchestration
//!
//! [`Js5Store`] ties the sector store, the codecs and the entity tree
//! together. Decoding and encoding run archive by archive and group by
//! group; a unit that fails is marked on its record and skipped, so one
//! corrupt group never stops the rest of the batch. Only configuration
//! errors and invalid arguments abort.

use std::collections::BTreeMap;
use std::path::Path;

use js5_crypto::{XteaKeyStore, djb2};
use js5_formats::archive_index::{ArchiveFormat, ArchiveIndex, FileEntry, GroupEntry};
use js5_formats::group::{StripedFile, decode_group, encode_group, group_stripes};
use tracing::{debug, info, warn};

use crate::config::{ArchiveConfig, StoreConfig};
use crate::context::CodecContext;
use crate::entity::{Archive, CacheEntity, EntityKind, FlatFile, Group, Key};
use crate::name_table::{NameHashTable, NameTable};
use crate::record::FileIndexRecord;
use crate::repository::IndexRepository;
use crate::sector::SectorStore;
use crate::validate::validate;
use crate::{MAIN_ARCHIVE, Result, StorageError};

/// A whole cache: configuration, files on disk and the decoded tree
pub struct Js5Store {
    config: StoreConfig,
    sectors: SectorStore,
    names: Box<dyn NameTable>,
    keys: XteaKeyStore,
    archives: BTreeMap<u32, Archive>,
}

impl std::fmt::Debug for Js5Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Js5Store")
            .field("game_build", &self.config.game_build)
            .field("archives", &self.archives.len())
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl Js5Store {
    /// Create a store over existing sectors
    ///
    /// Fails when the configuration has no main archive.
    pub fn new(config: StoreConfig, sectors: SectorStore) -> Result<Self> {
        config.main_archive()?;
        Ok(Self {
            config,
            sectors,
            names: Box::new(NameHashTable::new()),
            keys: XteaKeyStore::new(),
            archives: BTreeMap::new(),
        })
    }

    /// Open the cache files in `dir`
    pub fn open(config: StoreConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let sectors = SectorStore::open(dir)?;
        Self::new(config, sectors)
    }

    /// Use a name table for hash lookups
    #[must_use]
    pub fn with_name_table(mut self, names: impl NameTable + 'static) -> Self {
        self.names = Box::new(names);
        self
    }

    /// Use a key store for encrypted units
    #[must_use]
    pub fn with_keys(mut self, keys: XteaKeyStore) -> Self {
        self.keys = keys;
        self
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Sector store
    pub fn sectors(&self) -> &SectorStore {
        &self.sectors
    }

    /// Mutable sector store
    pub fn sectors_mut(&mut self) -> &mut SectorStore {
        &mut self.sectors
    }

    /// Decoded archives in key order
    pub fn archives(&self) -> impl Iterator<Item = &Archive> {
        self.archives.values()
    }

    /// Archive by key or name
    pub fn archive(&self, key: &Key) -> Option<&Archive> {
        let id = self.resolve_archive(key)?;
        self.archives.get(&id)
    }

    /// Mutable archive by key or name
    pub fn archive_mut(&mut self, key: &Key) -> Option<&mut Archive> {
        let id = self.resolve_archive(key)?;
        self.archives.get_mut(&id)
    }

    /// Group by archive and group keys or names
    pub fn group(&self, archive: &Key, group: &Key) -> Option<&Group> {
        self.archive(archive)?.child(group)
    }

    /// Flat file by archive, group and file keys or names
    pub fn file(&self, archive: &Key, group: &Key, file: &Key) -> Option<&FlatFile> {
        self.group(archive, group)?.child(file)
    }

    fn resolve_archive(&self, key: &Key) -> Option<u32> {
        match key {
            Key::ById(id) => self.archives.contains_key(id).then_some(*id),
            Key::ByName(name) => self
                .config
                .archive_by_name(name)
                .map(|config| u32::from(config.index))
                .filter(|id| self.archives.contains_key(id)),
        }
    }

    /// Add or replace an empty configured archive
    ///
    /// The meta archive holds the other archives' indices and cannot be
    /// added as content.
    pub fn add_archive(&mut self, key: u32) -> Result<&mut Archive> {
        if key == u32::from(MAIN_ARCHIVE) {
            return Err(StorageError::InvalidArgument(format!(
                "archive {key} is the meta archive"
            )));
        }
        let config = self.archive_config(key)?;
        let mut archive = Archive::new(self.config.game_build, key);
        archive.record.name_hash = Some(djb2(&config.name));
        archive.record.name = Some(config.name.clone());
        self.archives.insert(key, archive);
        self.archives
            .get_mut(&key)
            .ok_or_else(|| StorageError::NotFound(format!("archive {key}")))
    }

    fn archive_config(&self, key: u32) -> Result<&ArchiveConfig> {
        let index = archive_index(key)?;
        self.config
            .archive(index)
            .ok_or_else(|| StorageError::Config(format!("no configuration for archive {key}")))
    }

    /// Read every configured archive's index from the meta archive
    ///
    /// Returns the number of archives decoded. Archives that fail keep an
    /// empty group list and record the failure.
    pub fn decode_archives(&mut self) -> Result<usize> {
        let main = self.config.main_archive()?;
        let main_context =
            CodecContext::new(self.config.game_build, main, self.names.as_ref(), &self.keys);

        let mut decoded = 0;
        for config in self.config.content_archives() {
            let key = u32::from(config.index);
            let mut archive = Archive::new(self.config.game_build, key);
            archive.record.name_hash = Some(djb2(&config.name));
            archive.record.name = Some(config.name.clone());

            let context = CodecContext {
                archive: config,
                ..main_context
            };
            match decode_archive(&main_context, &context, &self.sectors, &mut archive) {
                Ok(()) => decoded += 1,
                Err(err) => record_failure(&mut archive.record, err)?,
            }
            self.archives.insert(key, archive);
        }

        info!(
            "Decoded {} of {} archive indices",
            decoded,
            self.archives.len()
        );
        Ok(decoded)
    }

    /// Read and split every group of a decoded archive
    ///
    /// Returns the number of groups decoded.
    pub fn decode_groups(&mut self, archive_key: u32) -> Result<usize> {
        let index = archive_index(archive_key)?;
        let config = self
            .config
            .archive(index)
            .ok_or_else(|| StorageError::Config(format!("no configuration for archive {index}")))?;
        let context =
            CodecContext::new(self.config.game_build, config, self.names.as_ref(), &self.keys);
        let archive = self.archives.get_mut(&archive_key).ok_or_else(|| {
            StorageError::NotFound(format!("archive {archive_key} has not been decoded"))
        })?;

        let mut decoded = 0;
        for group in archive.children.values_mut() {
            match decode_group_entity(&context, &self.sectors, index, group) {
                Ok(()) => decoded += 1,
                Err(err) => record_failure(&mut group.record, err)?,
            }
        }

        info!(
            "Decoded {} of {} groups in archive {}",
            decoded,
            archive.children.len(),
            config.name
        );
        Ok(decoded)
    }

    /// Decode every archive and every group
    ///
    /// Returns the number of groups decoded.
    pub fn decode_all(&mut self) -> Result<usize> {
        self.decode_archives()?;
        let keys: Vec<u32> = self.archives.keys().copied().collect();
        let mut decoded = 0;
        for key in keys {
            decoded += self.decode_groups(key)?;
        }
        Ok(decoded)
    }

    /// Encode an archive's groups and index and pack them into the sectors
    ///
    /// Units whose bytes changed get a new version. Groups that cannot be
    /// sealed are marked and left out of the sectors.
    pub fn encode_archive(&mut self, archive_key: u32) -> Result<()> {
        let index = archive_index(archive_key)?;
        let main = self.config.main_archive()?;
        let config = self
            .config
            .archive(index)
            .ok_or_else(|| StorageError::Config(format!("no configuration for archive {index}")))?;
        let context =
            CodecContext::new(self.config.game_build, config, self.names.as_ref(), &self.keys);
        let archive = self
            .archives
            .get_mut(&archive_key)
            .ok_or_else(|| StorageError::NotFound(format!("archive {archive_key}")))?;

        let mut failed = 0;
        for group in archive.children.values_mut() {
            if let Err(err) = encode_group_entity(&context, &mut self.sectors, index, group) {
                record_failure(&mut group.record, err)?;
                failed += 1;
            }
        }

        // Versioned headers carry the version the archive is about to get
        let mut index = build_index(archive)?;
        let mut table = index.build()?;
        if index.format.is_versioned() && archive.data.as_deref() != Some(table.as_slice()) {
            index.version = archive.record.version.wrapping_add(1);
            table = index.build()?;
        }
        let main_context = CodecContext {
            archive: main,
            ..context
        };
        let envelope = seal(&main_context, archive, table)?;
        self.sectors.pack(MAIN_ARCHIVE, archive_key, &envelope)?;

        info!(
            "Encoded archive {} ({} groups, {} failed, version {})",
            config.name,
            archive.children.len(),
            failed,
            archive.record.version
        );
        Ok(())
    }

    /// Refresh derived metadata of every unit
    ///
    /// Returns the number of units that changed.
    pub fn validate_all(&mut self, track_changes: bool) -> usize {
        let names = self.names.as_ref();
        let mut modified = 0;
        for archive in self.archives.values_mut() {
            for group in archive.children.values_mut() {
                for file in group.children.values_mut() {
                    modified += usize::from(validate(file, names, track_changes));
                }
                modified += usize::from(validate(group, names, track_changes));
            }
            modified += usize::from(validate(archive, names, track_changes));
        }
        debug!("Validated cache, {} units changed", modified);
        modified
    }

    /// Records of every unit, archives first
    pub fn records(&self) -> Vec<FileIndexRecord> {
        let mut records = Vec::new();
        for archive in self.archives.values() {
            records.push(archive.record.clone());
            for group in archive.children.values() {
                records.push(group.record.clone());
                records.extend(group.children.values().map(|file| file.record.clone()));
            }
        }
        records
    }

    /// Write every record to a repository
    pub async fn persist(&self, repository: &dyn IndexRepository) -> Result<usize> {
        let records = self.records();
        let count = records.len();
        repository.upsert(records).await?;
        info!("Persisted {} index records", count);
        Ok(count)
    }

    /// Replace records with the ones stored in a repository
    ///
    /// A following [`Self::validate_all`] compares the live bytes against
    /// the restored records. Returns the number of records found.
    pub async fn restore_records(&mut self, repository: &dyn IndexRepository) -> Result<usize> {
        let mut restored = 0;
        for archive in self.archives.values_mut() {
            restored += usize::from(restore(repository, archive).await?);
            for group in archive.children.values_mut() {
                restored += usize::from(restore(repository, group).await?);
                for file in group.children.values_mut() {
                    restored += usize::from(restore(repository, file).await?);
                }
            }
        }
        info!("Restored {} index records", restored);
        Ok(restored)
    }

    /// Write the sector store to `dir`
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.sectors.save(dir).await
    }
}

fn archive_index(key: u32) -> Result<u8> {
    u8::try_from(key)
        .map_err(|_| StorageError::InvalidArgument(format!("archive key {key} is above 255")))
}

/// Mark a recoverable failure on a record, or pass a fatal one up
fn record_failure(record: &mut FileIndexRecord, err: StorageError) -> Result<()> {
    let Some(kind) = err.file_error() else {
        return Err(err);
    };
    warn!(
        "Skipping {:?} {} (archive {}, group {}): {}",
        record.file_type,
        record.display_name(),
        record.archive_key,
        record.group_key,
        err
    );
    record.file_error = Some(kind);
    Ok(())
}

fn decode_archive(
    main: &CodecContext<'_>,
    context: &CodecContext<'_>,
    sectors: &SectorStore,
    archive: &mut Archive,
) -> Result<()> {
    let envelope = sectors.unpack(MAIN_ARCHIVE, archive.key())?;
    let opened = main.open(archive.name(), &envelope)?;
    let index = ArchiveIndex::parse(&opened.contents.data)?;

    let record = &mut archive.record;
    record.archive_format = Some(index.format.as_byte());
    record.version = if index.format.is_versioned() {
        index.version
    } else {
        u32::from(opened.contents.version)
    };
    record.child_count = index.groups.len() as u32;
    record.encrypted = opened.encrypted;
    record.file_error = None;

    for entry in &index.groups {
        let group = archive.add_group(entry.key);
        apply_group_entry(context, group, entry);
    }

    debug!(
        "Decoded archive {} index ({} groups, format {:?})",
        archive.key(),
        index.groups.len(),
        index.format
    );
    archive.data = Some(opened.contents.data);
    archive.compressed = Some(envelope);
    Ok(())
}

fn apply_group_entry(context: &CodecContext<'_>, group: &mut Group, entry: &GroupEntry) {
    let record = &mut group.record;
    record.name_hash = entry.name_hash;
    record.name = context.resolve_name(entry.name_hash);
    record.compressed_checksum = entry.checksum;
    if let Some(checksum) = entry.raw_checksum {
        record.checksum = checksum;
    }
    record.whirlpool_digest = entry.whirlpool;
    if let Some(size) = entry.compressed_size {
        record.compressed_file_size = size;
    }
    if let Some(size) = entry.size {
        record.file_size = size;
    }
    record.version = entry.version;
    record.child_count = entry.files.len() as u32;

    for file_entry in &entry.files {
        let file = group.add_file(file_entry.key);
        file.record.name_hash = file_entry.name_hash;
        file.record.name = context.resolve_name(file_entry.name_hash);
    }
}

fn decode_group_entity(
    context: &CodecContext<'_>,
    sectors: &SectorStore,
    archive: u8,
    group: &mut Group,
) -> Result<()> {
    let envelope = sectors.unpack(archive, group.key())?;
    let opened = context.open(group.name(), &envelope)?;

    let keys: Vec<u32> = group.children.keys().copied().collect();
    for striped in decode_group(&opened.contents.data, &keys)? {
        if let Some(file) = group.children.get_mut(&striped.key) {
            file.record.file_size = striped.data.len() as u32;
            file.record.stripe_count = striped.stripes.len() as u32;
            file.record.stripes = striped.stripes;
            file.record.file_error = None;
            file.set_data(striped.data);
        }
    }

    debug!(
        "Decoded group {} of archive {} ({} files)",
        group.record.display_name(),
        archive,
        keys.len()
    );
    group.record.encrypted = opened.encrypted;
    group.record.file_error = None;
    group.data = Some(opened.contents.data);
    group.compressed = Some(envelope);
    Ok(())
}

fn encode_group_entity(
    context: &CodecContext<'_>,
    sectors: &mut SectorStore,
    archive: u8,
    group: &mut Group,
) -> Result<()> {
    for file in group.children.values_mut() {
        validate(file, context.names, true);
    }

    let files: Vec<StripedFile> = group
        .children
        .values()
        .map(|file| {
            let data = file.data.clone().unwrap_or_default();
            let stripes = if file.record.stripes.is_empty() {
                vec![data.len() as u32]
            } else {
                file.record.stripes.clone()
            };
            StripedFile::with_stripes(file.key(), data, stripes)
        })
        .collect();

    let boundaries = group_stripes(&files)?;
    let raw = encode_group(&files)?;
    for (file, stripes) in group.children.values_mut().zip(boundaries) {
        file.record.stripe_count = stripes.len() as u32;
        file.record.stripes = stripes;
    }

    let envelope = seal(context, group, raw)?;
    sectors.pack(archive, group.key(), &envelope)?;
    group.record.file_error = None;
    Ok(())
}

/// Replace an entity's bytes and envelope, bumping its version on change
fn seal<K: EntityKind>(
    context: &CodecContext<'_>,
    entity: &mut CacheEntity<K>,
    raw: Vec<u8>,
) -> Result<Vec<u8>> {
    entity.data = Some(raw);
    validate(entity, context.names, true);

    let data = entity.data.as_deref().unwrap_or_default();
    let (envelope, encrypted) = context.seal(entity.name(), data, entity.record.version)?;
    entity.record.encrypted = encrypted;
    entity.compressed = Some(envelope.clone());
    validate(entity, context.names, false);
    Ok(envelope)
}

fn build_index(archive: &Archive) -> Result<ArchiveIndex> {
    let format = archive
        .record
        .archive_format
        .map_or(Ok(ArchiveFormat::default()), ArchiveFormat::from_byte)?;

    let mut index = ArchiveIndex::new(format);
    index.version = archive.record.version;
    index.groups = archive
        .children
        .values()
        .map(|group| GroupEntry {
            name_hash: group.record.name_hash,
            checksum: group.record.compressed_checksum,
            raw_checksum: Some(group.record.checksum),
            whirlpool: group.record.whirlpool_digest,
            compressed_size: Some(group.record.compressed_file_size),
            size: Some(group.record.file_size),
            version: group.record.version,
            files: group
                .children
                .values()
                .map(|file| FileEntry {
                    key: file.key(),
                    name_hash: file.record.name_hash,
                })
                .collect(),
            ..GroupEntry::new(group.key())
        })
        .collect();
    Ok(index)
}

async fn restore<K: EntityKind>(
    repository: &dyn IndexRepository,
    entity: &mut CacheEntity<K>,
) -> Result<bool> {
    match repository.get(&entity.record.filter()).await? {
        Some(record) => {
            entity.record = record;
            Ok(true)
        }
        None => Ok(false),
    }
}
