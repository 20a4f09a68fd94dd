//! OLE2 compound file parser implementation
//!
//! A compound file is a small FAT file system inside a file: a header, a
//! sector allocation table (located through the DIFAT), a directory of
//! red-black trees of storages and streams, and a mini stream holding the
//! content of small streams in 64-byte mini sectors.

use crate::domain::entities::{ContainerKind, UniqueFileEntries};
use crate::domain::repositories::{ContainerEntries, ContainerEntryReader, EntryView};
use crate::domain::services::ScanBudget;
use crate::error::ContainerError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor};

/// Compound file signature
const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const HEADER_SIZE: usize = 512;
const HEADER_DIFAT_ENTRIES: usize = 109;
const DIRECTORY_ENTRY_SIZE: usize = 128;

/// Highest regular sector number; everything above is a marker
const MAXREGSECT: u32 = 0xFFFF_FFFA;
const DIFSECT: u32 = 0xFFFF_FFFC;
const FATSECT: u32 = 0xFFFF_FFFD;
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
const FREESECT: u32 = 0xFFFF_FFFF;
const NOSTREAM: u32 = 0xFFFF_FFFF;

const TYPE_STORAGE: u8 = 1;
const TYPE_STREAM: u8 = 2;
const TYPE_ROOT: u8 = 5;

fn header_field(e: io::Error) -> ContainerError {
    ContainerError::invalid("OLE2 header", e.to_string())
}

/// Compound file header
#[derive(Debug, Clone)]
pub struct Ole2Header {
    pub major_version: u16,
    pub sector_shift: u16,
    pub mini_sector_shift: u16,
    pub fat_sectors: u32,
    pub first_directory_sector: u32,
    pub mini_stream_cutoff: u32,
    pub first_mini_fat_sector: u32,
    pub mini_fat_sectors: u32,
    pub first_difat_sector: u32,
    pub difat_sectors: u32,
    pub difat: Vec<u32>,
}

impl Ole2Header {
    pub fn parse(data: &[u8]) -> Result<Self, ContainerError> {
        if data.len() < HEADER_SIZE {
            return Err(ContainerError::NotAContainer {
                kind: "OLE2",
                reason: format!("{} bytes is too small for a compound file header", data.len()),
            });
        }
        if data[..8] != OLE2_MAGIC {
            return Err(ContainerError::NotAContainer {
                kind: "OLE2",
                reason: "missing compound file signature".to_string(),
            });
        }

        let mut cursor = Cursor::new(data);

        // Skip signature and CLSID, minor version at offset 24
        cursor.set_position(26);
        let major_version = cursor.read_u16::<LittleEndian>().map_err(header_field)?;
        let byte_order = cursor.read_u16::<LittleEndian>().map_err(header_field)?;
        let sector_shift = cursor.read_u16::<LittleEndian>().map_err(header_field)?;
        let mini_sector_shift = cursor.read_u16::<LittleEndian>().map_err(header_field)?;

        // Reserved bytes and the directory sector count (unused in v3)
        cursor.set_position(44);
        let fat_sectors = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let first_directory_sector = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let _transaction_signature = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let mini_stream_cutoff = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let first_mini_fat_sector = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let mini_fat_sectors = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let first_difat_sector = cursor.read_u32::<LittleEndian>().map_err(header_field)?;
        let difat_sectors = cursor.read_u32::<LittleEndian>().map_err(header_field)?;

        let mut difat = Vec::with_capacity(HEADER_DIFAT_ENTRIES);
        for _ in 0..HEADER_DIFAT_ENTRIES {
            difat.push(cursor.read_u32::<LittleEndian>().map_err(header_field)?);
        }

        if byte_order != 0xFFFE {
            return Err(ContainerError::invalid(
                "OLE2 header",
                format!("unexpected byte order mark {byte_order:#06x}"),
            ));
        }
        match (major_version, sector_shift) {
            (3, 9) | (4, 12) => {}
            _ => {
                return Err(ContainerError::invalid(
                    "OLE2 header",
                    format!("version {major_version} with sector shift {sector_shift}"),
                ));
            }
        }
        if mini_sector_shift != 6 {
            return Err(ContainerError::invalid(
                "OLE2 header",
                format!("mini sector shift {mini_sector_shift}"),
            ));
        }

        Ok(Self {
            major_version,
            sector_shift,
            mini_sector_shift,
            fat_sectors,
            first_directory_sector,
            mini_stream_cutoff,
            first_mini_fat_sector,
            mini_fat_sectors,
            first_difat_sector,
            difat_sectors,
            difat,
        })
    }

    pub fn sector_size(&self) -> usize {
        1 << self.sector_shift
    }

    pub fn mini_sector_size(&self) -> usize {
        1 << self.mini_sector_shift
    }
}

/// One 128-byte directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub object_type: u8,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub start_sector: u32,
    pub size: u64,
}

impl DirectoryEntry {
    fn parse(raw: &[u8], major_version: u16) -> Result<Self, ContainerError> {
        let name_len = LittleEndian::read_u16(&raw[64..]) as usize;
        if name_len > 64 || name_len % 2 != 0 {
            return Err(ContainerError::invalid(
                "OLE2 directory entry",
                format!("name length {name_len}"),
            ));
        }

        // The stored length counts the terminating NUL
        let units: Vec<u16> = raw[..name_len.saturating_sub(2)]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .collect();

        let mut size = LittleEndian::read_u64(&raw[120..]);
        if major_version == 3 {
            // High half is undefined in version 3 files
            size &= 0xFFFF_FFFF;
        }

        Ok(Self {
            name: String::from_utf16_lossy(&units),
            object_type: raw[66],
            left: LittleEndian::read_u32(&raw[68..]),
            right: LittleEndian::read_u32(&raw[72..]),
            child: LittleEndian::read_u32(&raw[76..]),
            start_sector: LittleEndian::read_u32(&raw[116..]),
            size,
        })
    }

    pub fn is_stream(&self) -> bool {
        self.object_type == TYPE_STREAM
    }

    pub fn is_storage(&self) -> bool {
        self.object_type == TYPE_STORAGE || self.object_type == TYPE_ROOT
    }
}

/// Parsed compound file with its allocation tables and directory
pub struct Ole2Parser<'a> {
    data: &'a [u8],
    header: Ole2Header,
    fat: Vec<u32>,
    directory: Vec<DirectoryEntry>,
}

impl<'a> Ole2Parser<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, ContainerError> {
        let header = Ole2Header::parse(data)?;
        let mut parser = Self {
            data,
            header,
            fat: Vec::new(),
            directory: Vec::new(),
        };
        parser.fat = parser.load_fat()?;
        parser.directory = parser.load_directory()?;
        Ok(parser)
    }

    pub fn header(&self) -> &Ole2Header {
        &self.header
    }

    pub fn directory(&self) -> &[DirectoryEntry] {
        &self.directory
    }

    /// Bytes of a regular sector; the final sector of a file may be short
    fn sector(&self, id: u32) -> Result<&'a [u8], ContainerError> {
        let size = self.header.sector_size();
        let start = (id as usize + 1) * size;
        if id > MAXREGSECT || start >= self.data.len() {
            return Err(ContainerError::Truncated {
                what: "OLE2 sector",
                offset: start as u64,
            });
        }
        Ok(&self.data[start..(start + size).min(self.data.len())])
    }

    fn sector_count(&self) -> usize {
        self.data.len().div_ceil(self.header.sector_size())
    }

    fn load_fat(&self) -> Result<Vec<u32>, ContainerError> {
        let wanted = self.header.fat_sectors as usize;
        let per_sector = self.header.sector_size() / 4;

        let mut fat_sectors: Vec<u32> = self
            .header
            .difat
            .iter()
            .copied()
            .filter(|&id| id <= MAXREGSECT)
            .take(wanted)
            .collect();

        // DIFAT sectors hold one entry less than fits; the last is the link
        let mut next = self.header.first_difat_sector;
        let mut visited = 0usize;
        while fat_sectors.len() < wanted && next != ENDOFCHAIN && next != FREESECT {
            if visited > self.header.difat_sectors as usize || visited > self.sector_count() {
                return Err(ContainerError::BrokenChain {
                    start: self.header.first_difat_sector,
                    reason: "DIFAT chain does not terminate".to_string(),
                });
            }
            visited += 1;

            let sector = self.sector(next)?;
            let ids: Vec<u32> = sector.chunks_exact(4).map(LittleEndian::read_u32).collect();
            if ids.len() < per_sector {
                return Err(ContainerError::Truncated {
                    what: "DIFAT sector",
                    offset: (next as u64 + 1) << self.header.sector_shift,
                });
            }
            fat_sectors.extend(
                ids[..per_sector - 1]
                    .iter()
                    .copied()
                    .filter(|&id| id <= MAXREGSECT)
                    .take(wanted - fat_sectors.len()),
            );
            next = ids[per_sector - 1];
        }

        if fat_sectors.len() < wanted {
            return Err(ContainerError::invalid(
                "OLE2 allocation table",
                format!("header declares {wanted} FAT sectors, found {}", fat_sectors.len()),
            ));
        }

        let mut fat = Vec::with_capacity(wanted * per_sector);
        for id in fat_sectors {
            fat.extend(self.sector(id)?.chunks_exact(4).map(LittleEndian::read_u32));
        }
        Ok(fat)
    }

    /// Follows a chain through `table`, rejecting cycles and markers
    fn chain(table: &[u32], start: u32) -> Result<Vec<u32>, ContainerError> {
        let mut chain = Vec::new();
        let mut current = start;

        while current != ENDOFCHAIN {
            match current {
                FREESECT | FATSECT | DIFSECT => {
                    return Err(ContainerError::BrokenChain {
                        start,
                        reason: format!("reached special sector {current:#010x}"),
                    });
                }
                id if id > MAXREGSECT => {
                    return Err(ContainerError::BrokenChain {
                        start,
                        reason: format!("reserved sector number {id:#010x}"),
                    });
                }
                _ => {}
            }
            if chain.len() >= table.len() {
                return Err(ContainerError::BrokenChain {
                    start,
                    reason: "chain loops".to_string(),
                });
            }

            chain.push(current);
            current = *table
                .get(current as usize)
                .ok_or_else(|| ContainerError::BrokenChain {
                    start,
                    reason: format!("sector {current} is outside the allocation table"),
                })?;
        }
        Ok(chain)
    }

    fn read_chain(&self, start: u32) -> Result<Vec<u8>, ContainerError> {
        let mut out = Vec::new();
        for id in Self::chain(&self.fat, start)? {
            out.extend_from_slice(self.sector(id)?);
        }
        Ok(out)
    }

    fn load_directory(&self) -> Result<Vec<DirectoryEntry>, ContainerError> {
        let raw = self.read_chain(self.header.first_directory_sector)?;
        let entries = raw
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .map(|chunk| DirectoryEntry::parse(chunk, self.header.major_version))
            .collect::<Result<Vec<_>, _>>()?;

        match entries.first() {
            Some(root) if root.object_type == TYPE_ROOT => Ok(entries),
            _ => Err(ContainerError::invalid(
                "OLE2 directory",
                "first entry is not the root storage",
            )),
        }
    }

    /// Full '/'-separated paths of every stream, with their directory index
    pub fn stream_paths(&self) -> Result<Vec<(String, usize)>, ContainerError> {
        let mut streams = Vec::new();
        let mut visited = vec![false; self.directory.len()];
        visited[0] = true;
        let mut pending = vec![(self.directory[0].child, String::new())];

        while let Some((id, prefix)) = pending.pop() {
            if id == NOSTREAM {
                continue;
            }
            let index = id as usize;
            let entry = self.directory.get(index).ok_or_else(|| {
                ContainerError::invalid("OLE2 directory", format!("entry {id} is out of range"))
            })?;
            if std::mem::replace(&mut visited[index], true) {
                return Err(ContainerError::invalid(
                    "OLE2 directory",
                    format!("entry {id} is reachable twice"),
                ));
            }

            pending.push((entry.left, prefix.clone()));
            pending.push((entry.right, prefix.clone()));

            let path = format!("{prefix}{}", entry.name);
            if entry.is_stream() {
                streams.push((path, index));
            } else if entry.is_storage() {
                pending.push((entry.child, format!("{path}/")));
            }
        }
        Ok(streams)
    }

    fn load_mini_stream(&self) -> Result<(Vec<u8>, Vec<u32>), ContainerError> {
        let root = &self.directory[0];
        let mut mini_stream = self.read_chain(root.start_sector)?;
        mini_stream.truncate(usize::try_from(root.size).unwrap_or(usize::MAX));

        let mini_fat = if self.header.mini_fat_sectors == 0 {
            Vec::new()
        } else {
            self.read_chain(self.header.first_mini_fat_sector)?
                .chunks_exact(4)
                .map(LittleEndian::read_u32)
                .collect()
        };
        Ok((mini_stream, mini_fat))
    }

    /// Content of the stream at directory index `index`
    pub fn stream(&self, index: usize) -> Result<Vec<u8>, ContainerError> {
        let mut mini = None;
        self.stream_with(index, &mut mini)
    }

    fn stream_with(
        &self,
        index: usize,
        mini: &mut Option<(Vec<u8>, Vec<u32>)>,
    ) -> Result<Vec<u8>, ContainerError> {
        let entry = &self.directory[index];
        if entry.size == 0 {
            return Ok(Vec::new());
        }
        let size = usize::try_from(entry.size).map_err(|_| {
            ContainerError::invalid("OLE2 stream", format!("'{}' is too large", entry.name))
        })?;

        let mut out = if entry.size < u64::from(self.header.mini_stream_cutoff) {
            let (mini_stream, mini_fat) = match mini {
                Some(loaded) => &*loaded,
                None => &*mini.insert(self.load_mini_stream()?),
            };

            let sector_size = self.header.mini_sector_size();
            let mut out = Vec::with_capacity(size);
            for id in Self::chain(mini_fat, entry.start_sector)? {
                let start = id as usize * sector_size;
                let bytes = mini_stream
                    .get(start..(start + sector_size).min(mini_stream.len()))
                    .ok_or(ContainerError::Truncated {
                        what: "OLE2 mini stream",
                        offset: start as u64,
                    })?;
                out.extend_from_slice(bytes);
            }
            out
        } else {
            self.read_chain(entry.start_sector)?
        };

        if out.len() < size {
            return Err(ContainerError::BrokenChain {
                start: entry.start_sector,
                reason: format!(
                    "'{}' declares {size} bytes, chain holds {}",
                    entry.name,
                    out.len()
                ),
            });
        }
        out.truncate(size);
        Ok(out)
    }
}

/// Container entry reader for OLE2 compound files
#[derive(Debug, Clone, Copy, Default)]
pub struct Ole2EntryReader;

impl Ole2EntryReader {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerEntryReader for Ole2EntryReader {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Ole2
    }

    // Streams are stored uncompressed inside the container, so a whole
    // stream never outgrows the input and the budget is left to the matcher.
    fn read_entries_within<'a>(
        &self,
        container: &'a [u8],
        wanted: &UniqueFileEntries,
        _budget: ScanBudget,
    ) -> Result<ContainerEntries<'a>, ContainerError> {
        let parser = Ole2Parser::new(container)?;
        let mut entries = ContainerEntries::new();
        let mut mini = None;

        for (path, index) in parser.stream_paths()? {
            if !wanted.contains(&path) || entries.contains(&path) {
                continue;
            }
            let content = parser.stream_with(index, &mut mini)?;
            entries.insert(path, EntryView::owned(content));
        }

        Ok(entries)
    }
}
