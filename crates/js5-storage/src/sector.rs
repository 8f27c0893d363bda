//! Sector chains in the shared data file
//!
//! Every stored unit is located through a 6-byte entry in its archive's
//! index file and stored as a chain of 520-byte sectors in
//! `main_file_cache.dat2`:
//!
//! ```text
//! index entry:  u24 size | u24 first sector
//! sector:       u16 file key | u16 sequence | u24 next sector | u8 archive | 512 bytes
//! extended:     u32 file key | u16 sequence | u24 next sector | u8 archive | 510 bytes
//! ```
//!
//! The extended header is used for file keys above `0xFFFF`. Sector 0 is
//! never allocated since a next sector of 0 ends a chain.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use binrw::{BinRead, BinReaderExt, BinResult, BinWrite, BinWriterExt, Endian};
use memmap2::{Mmap, MmapOptions};
use tokio::fs;
use tracing::{debug, info};

use crate::{DATA_FILE, MAIN_ARCHIVE, Result, StorageError, index_file_name};

/// Size of a sector in the data file
pub const SECTOR_SIZE: usize = 520;

/// Size of an index entry
pub const INDEX_ENTRY_SIZE: usize = 6;

/// Header size for file keys up to `0xFFFF`
pub const HEADER_SIZE: usize = 8;

/// Header size for larger file keys
pub const EXTENDED_HEADER_SIZE: usize = 10;

/// Largest size or sector number an index entry can hold
pub const MAX_U24: u32 = 0x00FF_FFFF;

/// Custom binrw parser for 24-bit big-endian fields
fn parse_u24<R: std::io::Read + std::io::Seek>(
    reader: &mut R,
    _endian: Endian,
    _args: (),
) -> BinResult<u32> {
    let bytes: [u8; 3] = reader.read_be()?;
    Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
}

/// Custom binrw writer for 24-bit big-endian fields
fn write_u24<W: std::io::Write + std::io::Seek>(
    value: &u32,
    writer: &mut W,
    _endian: Endian,
    _args: (),
) -> BinResult<()> {
    if *value > MAX_U24 {
        return Err(binrw::Error::AssertFail {
            pos: 0,
            message: format!("{value} does not fit in 24 bits"),
        });
    }
    let [_, high, mid, low] = value.to_be_bytes();
    writer.write_be(&[high, mid, low])
}

/// Entry in an archive index file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct IndexEntry {
    /// Size of the stored unit in bytes
    #[br(parse_with = parse_u24)]
    #[bw(write_with = write_u24)]
    pub size: u32,

    /// First sector of the chain
    #[br(parse_with = parse_u24)]
    #[bw(write_with = write_u24)]
    pub sector: u32,
}

/// Sector header, widened to a 32-bit file key
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct SectorHeader {
    /// File key within the archive
    pub file_key: u32,

    /// Position of the sector in its chain, starting at 0
    pub sequence: u16,

    /// Next sector of the chain, 0 for the last
    #[br(parse_with = parse_u24)]
    #[bw(write_with = write_u24)]
    pub next_sector: u32,

    /// Archive the chain belongs to
    pub archive: u8,
}

/// Sector header with a 16-bit file key
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
struct CompactSectorHeader {
    file_key: u16,
    sequence: u16,
    #[br(parse_with = parse_u24)]
    #[bw(write_with = write_u24)]
    next_sector: u32,
    archive: u8,
}

impl SectorHeader {
    /// Whether a file key needs the extended layout
    pub const fn is_extended(file_key: u32) -> bool {
        file_key > 0xFFFF
    }

    /// Header size for a file key
    pub const fn size_for(file_key: u32) -> usize {
        if Self::is_extended(file_key) {
            EXTENDED_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Payload bytes per sector for a file key
    pub const fn payload_for(file_key: u32) -> usize {
        SECTOR_SIZE - Self::size_for(file_key)
    }

    /// Parse the header layout used for `file_key`
    pub fn parse(data: &[u8], file_key: u32) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if Self::is_extended(file_key) {
            return Ok(Self::read_be(&mut cursor)?);
        }
        let compact = CompactSectorHeader::read_be(&mut cursor)?;
        Ok(Self {
            file_key: u32::from(compact.file_key),
            sequence: compact.sequence,
            next_sector: compact.next_sector,
            archive: compact.archive,
        })
    }

    /// Serialize with the layout its file key calls for
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(EXTENDED_HEADER_SIZE));
        if Self::is_extended(self.file_key) {
            self.write_be(&mut cursor)?;
        } else {
            CompactSectorHeader {
                file_key: self.file_key as u16,
                sequence: self.sequence,
                next_sector: self.next_sector,
                archive: self.archive,
            }
            .write_be(&mut cursor)?;
        }
        Ok(cursor.into_inner())
    }
}

/// Backing bytes of the data file or an index file
///
/// Opened files are mapped read-only; the first write copies the mapping
/// into an owned buffer.
#[derive(Debug, Default)]
struct Channel {
    mapped: Option<Mmap>,
    owned: Vec<u8>,
}

impl Channel {
    fn owned(data: Vec<u8>) -> Self {
        Self {
            mapped: None,
            owned: data,
        }
    }

    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::default());
        }

        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            mapped: Some(mmap),
            owned: Vec::new(),
        })
    }

    fn bytes(&self) -> &[u8] {
        self.mapped.as_deref().unwrap_or(&self.owned)
    }

    fn to_mut(&mut self) -> &mut Vec<u8> {
        if let Some(mmap) = self.mapped.take() {
            self.owned = mmap.to_vec();
        }
        &mut self.owned
    }
}

/// Data file plus one index file per archive
#[derive(Debug, Default)]
pub struct SectorStore {
    data: Channel,
    indices: BTreeMap<u8, Channel>,
}

impl SectorStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store over existing file contents
    pub fn from_bytes(data: Vec<u8>, indices: BTreeMap<u8, Vec<u8>>) -> Self {
        Self {
            data: Channel::owned(data),
            indices: indices
                .into_iter()
                .map(|(archive, index)| (archive, Channel::owned(index)))
                .collect(),
        }
    }

    /// Map the data file and every index file present in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Opening cache files from {}", dir.display());

        let data = Channel::open(&dir.join(DATA_FILE))?;
        let mut indices = BTreeMap::new();
        for archive in 0..=MAIN_ARCHIVE {
            let path = dir.join(index_file_name(archive));
            if path.is_file() {
                debug!("Opening index {} from {}", archive, path.display());
                indices.insert(archive, Channel::open(&path)?);
            }
        }

        info!(
            "Opened data file ({} bytes) and {} index files",
            data.bytes().len(),
            indices.len()
        );
        Ok(Self { data, indices })
    }

    /// Write the data file and every index file into `dir`
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        fs::write(dir.join(DATA_FILE), self.data.bytes()).await?;
        for (&archive, index) in &self.indices {
            fs::write(dir.join(index_file_name(archive)), index.bytes()).await?;
        }

        info!(
            "Saved data file and {} index files to {}",
            self.indices.len(),
            dir.display()
        );
        Ok(())
    }

    /// Archives with an index file
    pub fn archives(&self) -> impl Iterator<Item = u8> + '_ {
        self.indices.keys().copied()
    }

    /// Raw data file bytes
    pub fn data(&self) -> &[u8] {
        self.data.bytes()
    }

    /// Raw index file bytes for an archive
    pub fn index(&self, archive: u8) -> Option<&[u8]> {
        self.indices.get(&archive).map(Channel::bytes)
    }

    /// Number of entries in an archive's index file
    pub fn entry_count(&self, archive: u8) -> usize {
        self.index(archive)
            .map_or(0, |index| index.len() / INDEX_ENTRY_SIZE)
    }

    /// Read the index entry for a file
    pub fn entry(&self, archive: u8, file: u32) -> Result<IndexEntry> {
        let missing = || StorageError::FileMissing { archive, file };
        let index = self.index(archive).ok_or_else(missing)?;
        let offset = file as usize * INDEX_ENTRY_SIZE;
        let bytes = index
            .get(offset..offset + INDEX_ENTRY_SIZE)
            .ok_or_else(missing)?;
        Ok(IndexEntry::read_be(&mut Cursor::new(bytes))?)
    }

    /// Read the stored bytes of a file by following its sector chain
    pub fn unpack(&self, archive: u8, file: u32) -> Result<Vec<u8>> {
        if archive == MAIN_ARCHIVE && u32::from(archive) == file {
            return Err(StorageError::InvalidArgument(format!(
                "file {file} of archive {archive} is the meta index itself"
            )));
        }

        let entry = self.entry(archive, file)?;
        if entry.size == 0 || entry.sector == 0 {
            return Err(StorageError::FileMissing { archive, file });
        }

        let corrupt = |reason: String| StorageError::CorruptChain {
            archive,
            file,
            reason,
        };

        let header_size = SectorHeader::size_for(file);
        let payload_size = SectorHeader::payload_for(file);
        let size = entry.size as usize;
        let data = self.data.bytes();

        let mut output = Vec::with_capacity(size);
        let mut sector = entry.sector;
        let mut sequence = 0u16;
        while output.len() < size {
            let chunk = payload_size.min(size - output.len());
            let start = sector as usize * SECTOR_SIZE;
            let bytes = data
                .get(start..start + header_size + chunk)
                .ok_or_else(|| corrupt(format!("sector {sector} is past the end of the data file")))?;

            let header = SectorHeader::parse(bytes, file)?;
            if header.file_key != file {
                return Err(corrupt(format!(
                    "sector {sector} belongs to file {}",
                    header.file_key
                )));
            }
            if header.archive != archive {
                return Err(corrupt(format!(
                    "sector {sector} belongs to archive {}",
                    header.archive
                )));
            }
            if header.sequence != sequence {
                return Err(corrupt(format!(
                    "sector {sector} has sequence {}, expected {sequence}",
                    header.sequence
                )));
            }

            output.extend_from_slice(&bytes[header_size..]);
            sequence = sequence.wrapping_add(1);

            if output.len() < size {
                if header.next_sector == 0 {
                    return Err(corrupt(format!(
                        "chain ends after {} of {size} bytes",
                        output.len()
                    )));
                }
                sector = header.next_sector;
            }
        }

        debug!(
            "Unpacked file {} from archive {} ({} bytes)",
            file, archive, size
        );
        Ok(output)
    }

    /// Store a file as a new sector chain at the end of the data file
    ///
    /// Sectors of a previous version of the file are left in place.
    pub fn pack(&mut self, archive: u8, file: u32, bytes: &[u8]) -> Result<()> {
        if archive == MAIN_ARCHIVE && u32::from(archive) == file {
            return Err(StorageError::InvalidArgument(format!(
                "file {file} of archive {archive} is the meta index itself"
            )));
        }
        let size = u32::try_from(bytes.len())
            .ok()
            .filter(|&size| size <= MAX_U24)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "{} bytes do not fit in an index entry",
                    bytes.len()
                ))
            })?;

        let payload_size = SectorHeader::payload_for(file);
        let data = self.data.to_mut();
        let first = data.len().div_ceil(SECTOR_SIZE).max(1);
        let sectors = bytes.len().div_ceil(payload_size);
        if first + sectors > MAX_U24 as usize {
            return Err(StorageError::InvalidArgument(format!(
                "data file cannot address {sectors} more sectors"
            )));
        }

        data.resize(first * SECTOR_SIZE, 0);
        for (sequence, chunk) in bytes.chunks(payload_size).enumerate() {
            let sector = first + sequence;
            let next_sector = if sequence + 1 == sectors { 0 } else { sector + 1 };
            let header = SectorHeader {
                file_key: file,
                sequence: sequence as u16,
                next_sector: next_sector as u32,
                archive,
            };
            data.extend_from_slice(&header.to_bytes()?);
            data.extend_from_slice(chunk);
            data.resize((sector + 1) * SECTOR_SIZE, 0);
        }

        let entry = IndexEntry {
            size,
            sector: if sectors == 0 { 0 } else { first as u32 },
        };
        let mut encoded = Cursor::new(Vec::with_capacity(INDEX_ENTRY_SIZE));
        entry.write_be(&mut encoded)?;

        let index = self.indices.entry(archive).or_default().to_mut();
        let offset = file as usize * INDEX_ENTRY_SIZE;
        if index.len() < offset + INDEX_ENTRY_SIZE {
            index.resize(offset + INDEX_ENTRY_SIZE, 0);
        }
        index[offset..offset + INDEX_ENTRY_SIZE].copy_from_slice(encoded.get_ref());

        debug!(
            "Packed file {} into archive {} ({} bytes, {} sectors from {})",
            file, archive, size, sectors, first
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_index_entry_layout() {
        let entry = IndexEntry::read_be(&mut Cursor::new([0x01, 0x02, 0x03, 0x00, 0x00, 0x05]))
            .unwrap();
        assert_eq!(entry.size, 0x010203);
        assert_eq!(entry.sector, 5);

        let mut cursor = Cursor::new(Vec::new());
        entry.write_be(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), vec![0x01, 0x02, 0x03, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn test_index_entry_overflow() {
        let entry = IndexEntry {
            size: 0x0100_0000,
            sector: 1,
        };
        assert!(entry.write_be(&mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn test_header_layouts() {
        let header = SectorHeader {
            file_key: 0x1234,
            sequence: 2,
            next_sector: 0x00_0A_0B,
            archive: 7,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x12, 0x34, 0x00, 0x02, 0x00, 0x0A, 0x0B, 0x07]);
        assert_eq!(SectorHeader::parse(&bytes, 0x1234).unwrap(), header);

        let extended = SectorHeader {
            file_key: 0x0001_0000,
            ..header
        };
        let bytes = extended.to_bytes().unwrap();
        assert_eq!(bytes.len(), EXTENDED_HEADER_SIZE);
        assert_eq!(SectorHeader::parse(&bytes, 0x0001_0000).unwrap(), extended);
    }

    #[test]
    fn test_pack_layout() {
        let mut store = SectorStore::new();
        store.pack(3, 1, &patterned(600)).unwrap();

        // Sector 0 stays reserved, the file takes sectors 1 and 2
        assert_eq!(store.data().len(), 3 * SECTOR_SIZE);
        let entry = store.entry(3, 1).unwrap();
        assert_eq!(entry, IndexEntry { size: 600, sector: 1 });
        assert_eq!(store.entry_count(3), 2);

        let first = SectorHeader::parse(&store.data()[SECTOR_SIZE..], 1).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.next_sector, 2);
        assert_eq!(first.archive, 3);
        let second = SectorHeader::parse(&store.data()[2 * SECTOR_SIZE..], 1).unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.next_sector, 0);
    }

    #[test]
    fn test_unpack_round_trip() {
        let mut store = SectorStore::new();
        for (file, len) in [(0u32, 1usize), (1, 512), (2, 513), (3, 5000)] {
            store.pack(0, file, &patterned(len)).unwrap();
        }
        for (file, len) in [(0u32, 1usize), (1, 512), (2, 513), (3, 5000)] {
            assert_eq!(store.unpack(0, file).unwrap(), patterned(len));
        }
    }

    #[test]
    fn test_extended_keys() {
        let mut store = SectorStore::new();
        store.pack(2, 70_000, &patterned(1021)).unwrap();

        // 510 payload bytes per sector
        assert_eq!(store.data().len(), 4 * SECTOR_SIZE);
        assert_eq!(store.unpack(2, 70_000).unwrap(), patterned(1021));
    }

    #[test]
    fn test_missing_files() {
        let mut store = SectorStore::new();
        assert!(matches!(
            store.unpack(4, 0),
            Err(StorageError::FileMissing { archive: 4, file: 0 })
        ));

        store.pack(4, 2, b"data").unwrap();
        // Entries below 2 exist but are zero
        assert!(matches!(
            store.unpack(4, 1),
            Err(StorageError::FileMissing { .. })
        ));
        assert!(matches!(
            store.unpack(4, 3),
            Err(StorageError::FileMissing { .. })
        ));

        store.pack(4, 5, b"").unwrap();
        assert!(matches!(
            store.unpack(4, 5),
            Err(StorageError::FileMissing { .. })
        ));
    }

    #[test]
    fn test_meta_self_reference() {
        let mut store = SectorStore::new();
        assert!(matches!(
            store.unpack(MAIN_ARCHIVE, 255),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.pack(MAIN_ARCHIVE, 255, b"x"),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_corrupt_chains() {
        let mut store = SectorStore::new();
        store.pack(1, 0, &patterned(100)).unwrap();
        store.pack(1, 1, &patterned(100)).unwrap();

        let mut data = store.data().to_vec();
        let indices: BTreeMap<u8, Vec<u8>> =
            std::iter::once((1, store.index(1).unwrap().to_vec())).collect();

        // Point file 1 at file 0's sector
        let mut wrong_file = indices.clone();
        wrong_file.get_mut(&1).unwrap()[9..12].copy_from_slice(&[0, 0, 1]);
        let corrupted = SectorStore::from_bytes(data.clone(), wrong_file);
        assert!(matches!(
            corrupted.unpack(1, 1),
            Err(StorageError::CorruptChain { file: 1, .. })
        ));

        // Rewrite the archive byte of file 0's sector
        data[SECTOR_SIZE + 7] = 9;
        let corrupted = SectorStore::from_bytes(data.clone(), indices.clone());
        assert!(matches!(
            corrupted.unpack(1, 0),
            Err(StorageError::CorruptChain { archive: 1, .. })
        ));

        // Chain pointing past the end of the data file
        let mut past_end = indices;
        past_end.get_mut(&1).unwrap()[3..6].copy_from_slice(&[0, 0, 40]);
        let corrupted = SectorStore::from_bytes(data, past_end);
        assert!(matches!(
            corrupted.unpack(1, 0),
            Err(StorageError::CorruptChain { .. })
        ));
    }

    #[test]
    fn test_bad_sequence() {
        let mut store = SectorStore::new();
        store.pack(0, 0, &patterned(1000)).unwrap();

        let mut data = store.data().to_vec();
        // Sequence of the second sector
        data[2 * SECTOR_SIZE + 3] = 5;
        let indices = std::iter::once((0, store.index(0).unwrap().to_vec())).collect();
        let corrupted = SectorStore::from_bytes(data, indices);

        let err = corrupted.unpack(0, 0).unwrap_err();
        assert!(err.to_string().contains("sequence 5"));
    }

    #[test]
    fn test_oversized_file() {
        let mut store = SectorStore::new();
        let big = vec![0u8; MAX_U24 as usize + 1];
        assert!(matches!(
            store.pack(0, 0, &big),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = SectorStore::new();
        store.pack(0, 3, &patterned(2000)).unwrap();
        store.pack(MAIN_ARCHIVE, 0, b"index").unwrap();
        store.save(dir.path()).await.unwrap();

        assert!(dir.path().join("main_file_cache.idx0").is_file());
        assert!(dir.path().join("main_file_cache.idx255").is_file());

        let mut reopened = SectorStore::open(dir.path()).unwrap();
        assert_eq!(reopened.archives().collect::<Vec<_>>(), vec![0, MAIN_ARCHIVE]);
        assert_eq!(reopened.unpack(0, 3).unwrap(), patterned(2000));

        // Writing into a mapped channel switches it to an owned copy
        reopened.pack(0, 4, b"more").unwrap();
        assert_eq!(reopened.unpack(0, 4).unwrap(), b"more");
        assert_eq!(reopened.unpack(0, 3).unwrap(), patterned(2000));
    }

    proptest! {
        #[test]
        fn sector_chains_round_trip(
            data in prop::collection::vec(any::<u8>(), 1..3000),
            file in prop_oneof![0u32..100, 0x1_0000u32..0x2_0000],
        ) {
            let mut store = SectorStore::new();
            store.pack(9, file, &data).unwrap();
            prop_assert_eq!(store.unpack(9, file).unwrap(), data);
        }
    }
}
