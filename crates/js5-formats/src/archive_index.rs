//! Archive index (table of contents) format
//!
//! Every archive is described by an index stored in the meta archive (255).
//! The index lists the archive's groups and, for each group, its child files,
//! together with optional names, checksums, digests, sizes and versions.
//!
//! # Format
//!
//! All integers are big-endian. Key lists are delta encoded: each stored value
//! is added to an accumulator that starts at zero for every list.
//!
//! ```text
//! u8   format                      5 = original, 6 = versioned, 7 = smart
//! u32  version                     format >= 6 only
//! u8   flags                       names | whirlpool | sizes | raw checksums
//! N    group count                 u16, smart when format >= 7
//! N*   group key deltas
//! i32* group name hashes           names flag
//! i32* group checksums
//! i32* raw (decompressed) checksums raw checksums flag
//! 64b* whirlpool digests           whirlpool flag
//! u32* (compressed size, size)     sizes flag
//! u32* group versions
//! N*   file counts
//! N**  file key deltas per group
//! i32** file name hashes           names flag
//! ```
//!
//! # Encoding
//!
//! [`ArchiveIndex::build`] is the compact encoder the cache writer uses. It
//! only emits the name flag, always uses 16-bit widths, writes zero for every
//! group version and drops whirlpool digests, sizes and raw checksums.
//! Decoding its output therefore resets group versions to zero.
//! [`ArchiveIndex::build_full`] writes everything the decoder reads.

use bytes::BufMut;

use crate::buffer::{ByteReader, SMART_SHORT_MAX, put_smart};
use crate::error::{FormatError, Result};

/// Length of a whirlpool digest in bytes.
pub const WHIRLPOOL_SIZE: usize = 64;

/// Index format revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ArchiveFormat {
    /// No archive version, 16-bit counts
    #[default]
    Original = 5,
    /// Adds the archive version
    Versioned = 6,
    /// Counts and keys use smart integers
    Smart = 7,
}

impl ArchiveFormat {
    /// Parse from byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            5 => Ok(Self::Original),
            6 => Ok(Self::Versioned),
            7 => Ok(Self::Smart),
            other => Err(FormatError::InvalidArchiveFormat(format!(
                "unknown index format {other}"
            ))),
        }
    }

    /// Get byte representation
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the header carries an archive version
    pub fn is_versioned(self) -> bool {
        self >= Self::Versioned
    }

    /// Whether counts and key deltas are smart integers
    pub fn uses_smart(self) -> bool {
        self >= Self::Smart
    }
}

/// Optional blocks present in an index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndexFlags(pub u8);

impl IndexFlags {
    /// Group and file name hashes are present
    pub const NAMES: u8 = 0x01;
    /// Whirlpool digests are present
    pub const WHIRLPOOL: u8 = 0x02;
    /// Compressed and uncompressed group sizes are present
    pub const SIZES: u8 = 0x04;
    /// Checksums of the decompressed groups are present
    pub const RAW_CHECKSUMS: u8 = 0x08;

    /// Check a flag bit
    pub const fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Return a copy with a flag bit set or cleared
    #[must_use]
    pub const fn with(self, flag: u8, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | flag)
        } else {
            Self(self.0 & !flag)
        }
    }

    /// Name hashes present
    pub const fn names(self) -> bool {
        self.has(Self::NAMES)
    }

    /// Whirlpool digests present
    pub const fn whirlpool(self) -> bool {
        self.has(Self::WHIRLPOOL)
    }

    /// Group sizes present
    pub const fn sizes(self) -> bool {
        self.has(Self::SIZES)
    }

    /// Decompressed checksums present
    pub const fn raw_checksums(self) -> bool {
        self.has(Self::RAW_CHECKSUMS)
    }
}

/// Child file of a group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    /// File key within the group
    pub key: u32,
    /// Name hash, when the index carries names
    pub name_hash: Option<i32>,
}

impl FileEntry {
    /// Create an unnamed file entry
    pub const fn new(key: u32) -> Self {
        Self {
            key,
            name_hash: None,
        }
    }
}

/// Group described by an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Group key within the archive
    pub key: u32,
    /// Name hash, when the index carries names
    pub name_hash: Option<i32>,
    /// CRC-32 of the stored (compressed) group
    pub checksum: i32,
    /// CRC-32 of the decompressed group
    pub raw_checksum: Option<i32>,
    /// Whirlpool digest of the stored group
    pub whirlpool: Option<[u8; WHIRLPOOL_SIZE]>,
    /// Stored size
    pub compressed_size: Option<u32>,
    /// Decompressed size
    pub size: Option<u32>,
    /// Group version
    pub version: u32,
    /// Child files in key order
    pub files: Vec<FileEntry>,
}

impl GroupEntry {
    /// Create a group entry with no metadata and no files
    pub const fn new(key: u32) -> Self {
        Self {
            key,
            name_hash: None,
            checksum: 0,
            raw_checksum: None,
            whirlpool: None,
            compressed_size: None,
            size: None,
            version: 0,
            files: Vec::new(),
        }
    }
}

/// Decoded archive index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    /// Format revision
    pub format: ArchiveFormat,
    /// Archive version (format 6 and up)
    pub version: u32,
    /// Optional blocks present
    pub flags: IndexFlags,
    /// Groups in key order
    pub groups: Vec<GroupEntry>,
}

impl ArchiveIndex {
    /// Create an empty index
    pub fn new(format: ArchiveFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Find a group by key
    pub fn group(&self, key: u32) -> Option<&GroupEntry> {
        self.groups.iter().find(|group| group.key == key)
    }

    /// Decode an index from decompressed bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let format = ArchiveFormat::from_byte(reader.read_u8()?)?;
        let version = if format.is_versioned() {
            reader.read_u32()?
        } else {
            0
        };
        let flags = IndexFlags(reader.read_u8()?);

        let group_count = read_count(&mut reader, format)? as usize;
        // Every group needs at least one byte of key delta
        if group_count > reader.remaining() {
            return Err(FormatError::InvalidArchiveFormat(format!(
                "group count {group_count} exceeds remaining {} bytes",
                reader.remaining()
            )));
        }

        let mut groups = Vec::with_capacity(group_count);
        let mut accumulator = 0u32;
        for _ in 0..group_count {
            accumulator = accumulator.wrapping_add(read_count(&mut reader, format)?);
            groups.push(GroupEntry::new(accumulator));
        }

        if flags.names() {
            for group in &mut groups {
                group.name_hash = read_name(&mut reader)?;
            }
        }

        for group in &mut groups {
            group.checksum = reader.read_i32()?;
        }

        if flags.raw_checksums() {
            for group in &mut groups {
                group.raw_checksum = Some(reader.read_i32()?);
            }
        }

        if flags.whirlpool() {
            for group in &mut groups {
                group.whirlpool = Some(reader.read_array::<WHIRLPOOL_SIZE>()?);
            }
        }

        if flags.sizes() {
            for group in &mut groups {
                group.compressed_size = Some(reader.read_u32()?);
                group.size = Some(reader.read_u32()?);
            }
        }

        for group in &mut groups {
            group.version = reader.read_u32()?;
        }

        let mut file_counts = Vec::with_capacity(group_count);
        for _ in 0..group_count {
            file_counts.push(read_count(&mut reader, format)? as usize);
        }

        for (group, &count) in groups.iter_mut().zip(&file_counts) {
            if count > reader.remaining() {
                return Err(FormatError::InvalidArchiveFormat(format!(
                    "group {} claims {count} files with {} bytes left",
                    group.key,
                    reader.remaining()
                )));
            }
            group.files.reserve_exact(count);
            let mut accumulator = 0u32;
            for _ in 0..count {
                accumulator = accumulator.wrapping_add(read_count(&mut reader, format)?);
                group.files.push(FileEntry::new(accumulator));
            }
        }

        if flags.names() {
            for group in &mut groups {
                match group.files.len() {
                    0 => {}
                    // Single-file groups carry a placeholder instead of a name
                    1 => {
                        reader.read_i32()?;
                    }
                    _ => {
                        for file in &mut group.files {
                            file.name_hash = read_name(&mut reader)?;
                        }
                    }
                }
            }
        }

        Ok(Self {
            format,
            version,
            flags,
            groups,
        })
    }

    /// Encode with the compact encoder used when writing caches
    ///
    /// Only the names flag is emitted (set when any group has a name hash),
    /// counts and deltas are always 16-bit, and every group version is
    /// written as zero.
    pub fn build(&self) -> Result<Vec<u8>> {
        let named = self.groups.iter().any(|group| group.name_hash.is_some());
        let flags = IndexFlags::default().with(IndexFlags::NAMES, named);
        // A smart decoder reads short values only below 0x8000
        let limit = if self.format.uses_smart() {
            SMART_SHORT_MAX
        } else {
            u32::from(u16::MAX)
        };
        self.write(flags, Width::Short(limit), false)
    }

    /// Encode every block present in [`Self::flags`], with the widths the
    /// format calls for and the real group versions
    pub fn build_full(&self) -> Result<Vec<u8>> {
        let width = if self.format.uses_smart() {
            Width::Smart
        } else {
            Width::Short(u32::from(u16::MAX))
        };
        self.write(self.flags, width, true)
    }

    fn write(&self, flags: IndexFlags, width: Width, full: bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u8(self.format.as_byte());
        if self.format.is_versioned() {
            out.put_u32(self.version);
        }
        out.put_u8(flags.0);

        width.put(&mut out, self.groups.len() as u32, "group count")?;
        put_deltas(&mut out, self.groups.iter().map(|group| group.key), width, "group key")?;

        if flags.names() {
            for group in &self.groups {
                out.put_i32(group.name_hash.unwrap_or(0));
            }
        }

        for group in &self.groups {
            out.put_i32(group.checksum);
        }

        if full && flags.raw_checksums() {
            for group in &self.groups {
                out.put_i32(group.raw_checksum.unwrap_or(0));
            }
        }

        if full && flags.whirlpool() {
            for group in &self.groups {
                out.put_slice(&group.whirlpool.unwrap_or([0; WHIRLPOOL_SIZE]));
            }
        }

        if full && flags.sizes() {
            for group in &self.groups {
                out.put_u32(group.compressed_size.unwrap_or(0));
                out.put_u32(group.size.unwrap_or(0));
            }
        }

        for group in &self.groups {
            out.put_u32(if full { group.version } else { 0 });
        }

        for group in &self.groups {
            width.put(&mut out, group.files.len() as u32, "file count")?;
        }

        for group in &self.groups {
            put_deltas(&mut out, group.files.iter().map(|file| file.key), width, "file key")?;
        }

        if flags.names() {
            for group in &self.groups {
                match group.files.len() {
                    0 => {}
                    1 => out.put_i32(0),
                    _ => {
                        for file in &group.files {
                            out.put_i32(file.name_hash.unwrap_or(0));
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
enum Width {
    /// Two bytes, capped at the given value
    Short(u32),
    Smart,
}

impl Width {
    fn put(self, out: &mut Vec<u8>, value: u32, field: &'static str) -> Result<()> {
        match self {
            Self::Smart => put_smart(out, value).map_err(|_| FormatError::ValueOutOfRange {
                field,
                value: u64::from(value),
            }),
            Self::Short(limit) => {
                if value > limit {
                    return Err(FormatError::ValueOutOfRange {
                        field,
                        value: u64::from(value),
                    });
                }
                out.put_u16(value as u16);
                Ok(())
            }
        }
    }
}

fn put_deltas(
    out: &mut Vec<u8>,
    keys: impl Iterator<Item = u32>,
    width: Width,
    field: &'static str,
) -> Result<()> {
    let mut previous = 0u32;
    for (position, key) in keys.enumerate() {
        if position > 0 && key <= previous {
            return Err(FormatError::InvalidArchiveFormat(format!(
                "{field} {key} is not above previous key {previous}"
            )));
        }
        width.put(out, key - previous, field)?;
        previous = key;
    }
    Ok(())
}

fn read_count(reader: &mut ByteReader<'_>, format: ArchiveFormat) -> Result<u32> {
    if format.uses_smart() {
        reader.read_smart()
    } else {
        reader.read_u16().map(u32::from)
    }
}

/// Name hash of a group or file; 0 is written for units without a name
fn read_name(reader: &mut ByteReader<'_>) -> Result<Option<i32>> {
    let hash = reader.read_i32()?;
    Ok((hash != 0).then_some(hash))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_index(named: bool) -> ArchiveIndex {
        let name = |hash: i32| named.then_some(hash);
        let mut index = ArchiveIndex::new(ArchiveFormat::Original);
        index.groups = vec![
            GroupEntry {
                name_hash: name(1111),
                checksum: -12345,
                version: 7,
                files: vec![FileEntry {
                    key: 0,
                    name_hash: None,
                }],
                ..GroupEntry::new(0)
            },
            GroupEntry {
                name_hash: name(2222),
                checksum: 0x0102_0304,
                version: 9,
                files: vec![
                    FileEntry {
                        key: 0,
                        name_hash: name(-1),
                    },
                    FileEntry {
                        key: 3,
                        name_hash: name(42),
                    },
                    FileEntry {
                        key: 10,
                        name_hash: name(i32::MAX),
                    },
                ],
                ..GroupEntry::new(5)
            },
            GroupEntry {
                name_hash: name(3333),
                checksum: 77,
                ..GroupEntry::new(6)
            },
        ];
        index
    }

    #[test]
    fn test_compact_round_trip_named() {
        let index = sample_index(true);
        let decoded = ArchiveIndex::parse(&index.build().unwrap()).unwrap();

        assert_eq!(decoded.format, ArchiveFormat::Original);
        assert_eq!(decoded.flags, IndexFlags(IndexFlags::NAMES));
        assert_eq!(decoded.groups.len(), 3);
        for (original, decoded) in index.groups.iter().zip(&decoded.groups) {
            assert_eq!(decoded.key, original.key);
            assert_eq!(decoded.name_hash, original.name_hash);
            assert_eq!(decoded.checksum, original.checksum);
            assert_eq!(decoded.files.len(), original.files.len());
            // The compact encoder does not keep group versions
            assert_eq!(decoded.version, 0);
        }

        let keys: Vec<u32> = decoded.groups[1].files.iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![0, 3, 10]);
        let names: Vec<Option<i32>> = decoded.groups[1].files.iter().map(|f| f.name_hash).collect();
        assert_eq!(names, vec![Some(-1), Some(42), Some(i32::MAX)]);
        // Single-file groups carry no file name
        assert_eq!(decoded.groups[0].files[0].name_hash, None);
    }

    #[test]
    fn test_compact_round_trip_unnamed() {
        let index = sample_index(false);
        let data = index.build().unwrap();
        assert_eq!(data[1], 0, "no flags expected");

        let decoded = ArchiveIndex::parse(&data).unwrap();
        assert!(decoded.groups.iter().all(|g| g.name_hash.is_none()));
        assert_eq!(decoded.groups[2].key, 6);
        assert!(decoded.groups[2].files.is_empty());
    }

    #[test]
    fn test_unnamed_units_in_named_index() {
        let mut index = sample_index(true);
        index.groups[2].name_hash = None;
        index.groups[1].files[1].name_hash = None;

        let data = index.build().unwrap();
        assert_eq!(data[1], IndexFlags::NAMES);

        let decoded = ArchiveIndex::parse(&data).unwrap();
        assert_eq!(decoded.groups[0].name_hash, Some(1111));
        assert_eq!(decoded.groups[2].name_hash, None);
        let names: Vec<Option<i32>> = decoded.groups[1].files.iter().map(|f| f.name_hash).collect();
        assert_eq!(names, vec![Some(-1), None, Some(i32::MAX)]);
    }

    #[test]
    fn test_compact_layout() {
        let mut index = ArchiveIndex::new(ArchiveFormat::Original);
        index.groups = vec![GroupEntry {
            checksum: 1,
            files: vec![FileEntry::new(0)],
            ..GroupEntry::new(2)
        }];

        let data = index.build().unwrap();
        assert_eq!(
            data,
            vec![
                5, // format
                0, // flags
                0, 1, // group count
                0, 2, // group key delta
                0, 0, 0, 1, // checksum
                0, 0, 0, 0, // version
                0, 1, // file count
                0, 0, // file key delta
            ]
        );
    }

    #[test]
    fn test_parse_all_blocks() {
        let mut data = vec![7, 0, 0, 0, 42, 0x0F];
        data.extend_from_slice(&[0x00, 0x01]); // 1 group
        data.extend_from_slice(&[0x80, 0x01, 0x00, 0x00]); // key 0x10000
        data.extend_from_slice(&(-7i32).to_be_bytes()); // name
        data.extend_from_slice(&8i32.to_be_bytes()); // checksum
        data.extend_from_slice(&9i32.to_be_bytes()); // raw checksum
        data.extend_from_slice(&[0xAA; 64]); // whirlpool
        data.extend_from_slice(&100u32.to_be_bytes()); // compressed size
        data.extend_from_slice(&200u32.to_be_bytes()); // size
        data.extend_from_slice(&3u32.to_be_bytes()); // version
        data.extend_from_slice(&[0x00, 0x02]); // 2 files
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x04]); // keys 1, 5
        data.extend_from_slice(&11i32.to_be_bytes());
        data.extend_from_slice(&12i32.to_be_bytes());

        let index = ArchiveIndex::parse(&data).unwrap();
        assert_eq!(index.format, ArchiveFormat::Smart);
        assert_eq!(index.version, 42);
        let group = index.group(0x1_0000).expect("group present");
        assert_eq!(group.name_hash, Some(-7));
        assert_eq!(group.checksum, 8);
        assert_eq!(group.raw_checksum, Some(9));
        assert_eq!(group.whirlpool, Some([0xAA; 64]));
        assert_eq!(group.compressed_size, Some(100));
        assert_eq!(group.size, Some(200));
        assert_eq!(group.version, 3);
        assert_eq!(
            group.files,
            vec![
                FileEntry {
                    key: 1,
                    name_hash: Some(11)
                },
                FileEntry {
                    key: 5,
                    name_hash: Some(12)
                },
            ]
        );

        // Full encoding reproduces the input byte for byte
        assert_eq!(index.build_full().unwrap(), data);
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            ArchiveIndex::parse(&[4, 0, 0, 0]),
            Err(FormatError::InvalidArchiveFormat(_))
        ));
    }

    #[test]
    fn test_truncated_index() {
        let data = sample_index(true).build().unwrap();
        let result = ArchiveIndex::parse(&data[..data.len() - 3]);
        assert!(matches!(result, Err(FormatError::Underflow { .. })));
    }

    #[test]
    fn test_compact_rejects_wide_keys() {
        let mut index = ArchiveIndex::new(ArchiveFormat::Original);
        index.groups = vec![GroupEntry::new(0x1_0000)];
        assert!(matches!(
            index.build(),
            Err(FormatError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_unsorted_keys_rejected() {
        let mut index = ArchiveIndex::new(ArchiveFormat::Original);
        index.groups = vec![GroupEntry::new(4), GroupEntry::new(2)];
        assert!(matches!(
            index.build(),
            Err(FormatError::InvalidArchiveFormat(_))
        ));
    }

    fn arbitrary_index() -> impl Strategy<Value = ArchiveIndex> {
        let group = (
            1u32..50,
            prop::option::of(any::<i32>()),
            any::<i32>(),
            prop::collection::vec(1u32..20, 0..6),
        );
        (any::<bool>(), prop::collection::vec(group, 0..20)).prop_map(|(named, groups)| {
            let mut index = ArchiveIndex::new(ArchiveFormat::Original);
            let mut key = 0;
            for (step, name, checksum, file_steps) in groups {
                key += step;
                let mut file_key = 0;
                let files = file_steps
                    .into_iter()
                    .enumerate()
                    .map(|(i, step)| {
                        if i > 0 {
                            file_key += step;
                        }
                        FileEntry::new(file_key)
                    })
                    .collect();
                index.groups.push(GroupEntry {
                    name_hash: name.filter(|&hash| named && hash != 0),
                    checksum,
                    files,
                    ..GroupEntry::new(key)
                });
            }
            index
        })
    }

    proptest! {
        #[test]
        fn compact_encoding_keeps_keys_names_and_checksums(index in arbitrary_index()) {
            let decoded = ArchiveIndex::parse(&index.build().unwrap()).unwrap();
            prop_assert_eq!(decoded.groups.len(), index.groups.len());
            for (original, decoded) in index.groups.iter().zip(&decoded.groups) {
                prop_assert_eq!(decoded.key, original.key);
                prop_assert_eq!(decoded.name_hash, original.name_hash);
                prop_assert_eq!(decoded.checksum, original.checksum);
                prop_assert_eq!(decoded.version, 0);
                let original_keys: Vec<u32> = original.files.iter().map(|f| f.key).collect();
                let decoded_keys: Vec<u32> = decoded.files.iter().map(|f| f.key).collect();
                prop_assert_eq!(decoded_keys, original_keys);
            }
        }
    }
}
