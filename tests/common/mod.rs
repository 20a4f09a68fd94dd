//! Container fixtures shared by the integration tests
//!
//! Minimal writers for ZIP archives and version 3 OLE2 compound files, so
//! tests can build exactly the containers they need.

#![allow(dead_code)]

use container_puid::{
    ByteSequenceRule, ContainerFile, ContainerKind, ContainerSignature,
    ContainerSignatureDefinitions, FileFormatMapping,
};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

// ============================================================================
// ZIP
// ============================================================================

#[derive(Clone)]
struct ZipEntry {
    name: String,
    data: Vec<u8>,
    method: u16,
    flags: u16,
    crc: Option<u32>,
}

/// Builds a ZIP archive in memory
#[derive(Default, Clone)]
pub struct ZipBuilder {
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data: &[u8], method: u16, flags: u16) -> Self {
        self.entries.push(ZipEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            flags,
            crc: None,
        });
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 0, 0)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 8, 0)
    }

    pub fn directory(self, name: &str) -> Self {
        self.push(name, b"", 0, 0)
    }

    /// A stored entry with the "encrypted" flag set
    pub fn encrypted(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 0, 0x0001)
    }

    /// A stored entry declaring an unsupported compression method (bzip2)
    pub fn bzip2(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, 12, 0)
    }

    /// A stored entry whose recorded CRC-32 is wrong
    pub fn stored_with_bad_crc(mut self, name: &str, data: &[u8]) -> Self {
        let crc = crc32fast::hash(data) ^ 0xFFFF_FFFF;
        self = self.stored(name, data);
        if let Some(entry) = self.entries.last_mut() {
            entry.crc = Some(crc);
        }
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Writes ZIP64 records and extra fields
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let crc = entry.crc.unwrap_or_else(|| crc32fast::hash(&entry.data));
            let payload = if entry.method == 8 {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&entry.data).unwrap();
                encoder.finish().unwrap()
            } else {
                entry.data.clone()
            };
            let offset = out.len() as u64;
            let (small_comp, small_uncomp, small_offset) = if self.zip64 {
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (payload.len() as u32, entry.data.len() as u32, offset as u32)
            };

            // local file header
            put_u32(&mut out, 0x0403_4B50);
            put_u16(&mut out, 20);
            put_u16(&mut out, entry.flags);
            put_u16(&mut out, entry.method);
            put_u32(&mut out, 0); // time, date
            put_u32(&mut out, crc);
            put_u32(&mut out, small_comp);
            put_u32(&mut out, small_uncomp);
            put_u16(&mut out, entry.name.len() as u16);
            put_u16(&mut out, if self.zip64 { 20 } else { 0 });
            out.extend_from_slice(entry.name.as_bytes());
            if self.zip64 {
                put_u16(&mut out, 0x0001);
                put_u16(&mut out, 16);
                put_u64(&mut out, entry.data.len() as u64);
                put_u64(&mut out, payload.len() as u64);
            }
            out.extend_from_slice(&payload);

            // central directory header
            put_u32(&mut central, 0x0201_4B50);
            put_u16(&mut central, 45);
            put_u16(&mut central, 20);
            put_u16(&mut central, entry.flags);
            put_u16(&mut central, entry.method);
            put_u32(&mut central, 0);
            put_u32(&mut central, crc);
            put_u32(&mut central, small_comp);
            put_u32(&mut central, small_uncomp);
            put_u16(&mut central, entry.name.len() as u16);
            put_u16(&mut central, if self.zip64 { 28 } else { 0 });
            put_u16(&mut central, 0); // comment
            put_u16(&mut central, 0); // disk
            put_u16(&mut central, 0); // internal attributes
            put_u32(&mut central, 0); // external attributes
            put_u32(&mut central, small_offset);
            central.extend_from_slice(entry.name.as_bytes());
            if self.zip64 {
                put_u16(&mut central, 0x0001);
                put_u16(&mut central, 24);
                put_u64(&mut central, entry.data.len() as u64);
                put_u64(&mut central, payload.len() as u64);
                put_u64(&mut central, offset);
            }
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        let count = self.entries.len() as u64;
        out.extend_from_slice(&central);

        if self.zip64 {
            let record_offset = out.len() as u64;
            put_u32(&mut out, 0x0606_4B50);
            put_u64(&mut out, 44);
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, count);
            put_u64(&mut out, count);
            put_u64(&mut out, cd_size);
            put_u64(&mut out, cd_offset);

            put_u32(&mut out, 0x0706_4B50);
            put_u32(&mut out, 0);
            put_u64(&mut out, record_offset);
            put_u32(&mut out, 1);
        }

        put_u32(&mut out, 0x0605_4B50);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        if self.zip64 {
            put_u16(&mut out, u16::MAX);
            put_u16(&mut out, u16::MAX);
            put_u32(&mut out, u32::MAX);
            put_u32(&mut out, u32::MAX);
        } else {
            put_u16(&mut out, count as u16);
            put_u16(&mut out, count as u16);
            put_u32(&mut out, cd_size as u32);
            put_u32(&mut out, cd_offset as u32);
        }
        put_u16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}

// ============================================================================
// OLE2
// ============================================================================

const SECTOR: usize = 512;
const MINI_SECTOR: usize = 64;
const MINI_CUTOFF: usize = 4096;
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
const FREESECT: u32 = 0xFFFF_FFFF;
const FATSECT: u32 = 0xFFFF_FFFD;
const NOSTREAM: u32 = 0xFFFF_FFFF;

struct Node {
    name: String,
    kind: u8,
    children: Vec<usize>,
    data: Vec<u8>,
}

/// Builds a version 3 compound file in memory. Stream paths use '/' to
/// place streams inside storages.
#[derive(Default, Clone)]
pub struct Ole2Builder {
    streams: Vec<(String, Vec<u8>)>,
}

/// Offset of a FAT entry in files produced by [`Ole2Builder`]; the FAT
/// always starts at sector 0.
pub fn ole2_fat_entry_offset(sector: u32) -> usize {
    SECTOR + sector as usize * 4
}

/// First directory sector recorded in a compound file header
pub fn ole2_first_directory_sector(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[48..52].try_into().unwrap())
}

fn allocate(fat: &mut [u32], next: &mut u32, count: usize) -> u32 {
    if count == 0 {
        return ENDOFCHAIN;
    }
    let start = *next;
    for k in 0..count {
        let sector = start + k as u32;
        fat[sector as usize] = if k + 1 == count { ENDOFCHAIN } else { sector + 1 };
    }
    *next += count as u32;
    start
}

fn directory_entry(
    name: &str,
    kind: u8,
    left: u32,
    right: u32,
    child: u32,
    start: u32,
    size: u64,
) -> Vec<u8> {
    let mut entry = vec![0u8; 128];
    let units: Vec<u16> = name.encode_utf16().collect();
    for (i, unit) in units.iter().enumerate() {
        entry[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    let name_len = if name.is_empty() { 0 } else { (units.len() as u16 + 1) * 2 };
    entry[64..66].copy_from_slice(&name_len.to_le_bytes());
    entry[66] = kind;
    entry[67] = 1;
    entry[68..72].copy_from_slice(&left.to_le_bytes());
    entry[72..76].copy_from_slice(&right.to_le_bytes());
    entry[76..80].copy_from_slice(&child.to_le_bytes());
    entry[116..120].copy_from_slice(&start.to_le_bytes());
    entry[120..128].copy_from_slice(&size.to_le_bytes());
    entry
}

impl Ole2Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, path: &str, data: &[u8]) -> Self {
        self.streams.push((path.to_string(), data.to_vec()));
        self
    }

    fn tree(&self) -> Vec<Node> {
        let mut nodes = vec![Node {
            name: "Root Entry".to_string(),
            kind: 5,
            children: Vec::new(),
            data: Vec::new(),
        }];

        for (path, data) in &self.streams {
            let parts: Vec<&str> = path.split('/').collect();
            let mut parent = 0;
            for (i, part) in parts.iter().enumerate() {
                let last = i + 1 == parts.len();
                let existing = nodes[parent]
                    .children
                    .iter()
                    .copied()
                    .find(|&child| nodes[child].name == *part);
                parent = match existing {
                    Some(child) => child,
                    None => {
                        let id = nodes.len();
                        nodes.push(Node {
                            name: part.to_string(),
                            kind: if last { 2 } else { 1 },
                            children: Vec::new(),
                            data: if last { data.clone() } else { Vec::new() },
                        });
                        nodes[parent].children.push(id);
                        id
                    }
                };
            }
        }
        nodes
    }

    pub fn build(&self) -> Vec<u8> {
        let nodes = self.tree();
        let sectors_for = |len: usize| len.div_ceil(SECTOR);

        let mut starts = vec![ENDOFCHAIN; nodes.len()];
        let mut mini_stream = Vec::new();
        let mut mini_fat: Vec<u32> = Vec::new();
        let mut large = Vec::new();

        for (id, node) in nodes.iter().enumerate() {
            if node.kind != 2 || node.data.is_empty() {
                continue;
            }
            if node.data.len() < MINI_CUTOFF {
                let first = mini_fat.len() as u32;
                let count = node.data.len().div_ceil(MINI_SECTOR);
                for k in 0..count {
                    mini_fat.push(if k + 1 == count { ENDOFCHAIN } else { first + k as u32 + 1 });
                }
                starts[id] = first;
                mini_stream.extend_from_slice(&node.data);
                mini_stream.resize(mini_fat.len() * MINI_SECTOR, 0);
            } else {
                large.push(id);
            }
        }

        let dir_sectors = sectors_for(nodes.len() * 128);
        let mini_fat_sectors = sectors_for(mini_fat.len() * 4);
        let mini_stream_sectors = sectors_for(mini_stream.len());
        let large_sectors: usize = large.iter().map(|&id| sectors_for(nodes[id].data.len())).sum();
        let other = dir_sectors + mini_fat_sectors + mini_stream_sectors + large_sectors;

        let per_fat = SECTOR / 4;
        let mut fat_sectors = 1;
        while fat_sectors + other > fat_sectors * per_fat {
            fat_sectors += 1;
        }
        assert!(fat_sectors <= 109, "fixture too large for header DIFAT");

        let mut fat = vec![FREESECT; fat_sectors * per_fat];
        for entry in fat.iter_mut().take(fat_sectors) {
            *entry = FATSECT;
        }
        let mut next = fat_sectors as u32;
        let dir_start = allocate(&mut fat, &mut next, dir_sectors);
        let mini_fat_start = allocate(&mut fat, &mut next, mini_fat_sectors);
        let mini_stream_start = allocate(&mut fat, &mut next, mini_stream_sectors);
        for &id in &large {
            starts[id] = allocate(&mut fat, &mut next, sectors_for(nodes[id].data.len()));
        }

        let offset = |sector: u32| (sector as usize + 1) * SECTOR;
        let mut out = vec![0u8; SECTOR + next as usize * SECTOR];

        // header
        let mut header = Vec::with_capacity(SECTOR);
        header.extend_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
        header.extend_from_slice(&[0u8; 16]);
        put_u16(&mut header, 0x003E);
        put_u16(&mut header, 3);
        put_u16(&mut header, 0xFFFE);
        put_u16(&mut header, 9);
        put_u16(&mut header, 6);
        header.extend_from_slice(&[0u8; 6]);
        put_u32(&mut header, 0);
        put_u32(&mut header, fat_sectors as u32);
        put_u32(&mut header, dir_start);
        put_u32(&mut header, 0);
        put_u32(&mut header, MINI_CUTOFF as u32);
        put_u32(&mut header, mini_fat_start);
        put_u32(&mut header, mini_fat_sectors as u32);
        put_u32(&mut header, ENDOFCHAIN);
        put_u32(&mut header, 0);
        for i in 0..109u32 {
            put_u32(&mut header, if (i as usize) < fat_sectors { i } else { FREESECT });
        }
        out[..SECTOR].copy_from_slice(&header);

        // FAT
        for (i, entry) in fat.iter().enumerate() {
            let at = SECTOR + i * 4;
            out[at..at + 4].copy_from_slice(&entry.to_le_bytes());
        }

        // directory
        let left = vec![NOSTREAM; nodes.len()];
        let mut right = vec![NOSTREAM; nodes.len()];
        let mut child = vec![NOSTREAM; nodes.len()];
        for (id, node) in nodes.iter().enumerate() {
            if let Some(&first) = node.children.first() {
                child[id] = first as u32;
            }
            for pair in node.children.windows(2) {
                right[pair[0]] = pair[1] as u32;
            }
        }
        let mut directory = Vec::with_capacity(dir_sectors * SECTOR);
        for (id, node) in nodes.iter().enumerate() {
            let (start, size) = if id == 0 {
                (mini_stream_start, mini_stream.len() as u64)
            } else {
                (starts[id], node.data.len() as u64)
            };
            directory.extend(directory_entry(
                &node.name, node.kind, left[id], right[id], child[id], start, size,
            ));
        }
        while directory.len() < dir_sectors * SECTOR {
            directory.extend(directory_entry("", 0, NOSTREAM, NOSTREAM, NOSTREAM, 0, 0));
        }
        let at = offset(dir_start);
        out[at..at + directory.len()].copy_from_slice(&directory);

        // mini FAT and mini stream
        if mini_fat_sectors > 0 {
            let at = offset(mini_fat_start);
            for (i, entry) in mini_fat.iter().enumerate() {
                out[at + i * 4..at + i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
            }
            for i in mini_fat.len()..mini_fat_sectors * per_fat {
                out[at + i * 4..at + i * 4 + 4].copy_from_slice(&FREESECT.to_le_bytes());
            }
            let at = offset(mini_stream_start);
            out[at..at + mini_stream.len()].copy_from_slice(&mini_stream);
        }

        // large streams
        for &id in &large {
            let at = offset(starts[id]);
            out[at..at + nodes[id].data.len()].copy_from_slice(&nodes[id].data);
        }

        out
    }
}

// ============================================================================
// Signature definitions
// ============================================================================

/// EPUB, OpenDocument text and a legacy Word document, with their mappings
pub fn sample_definitions() -> ContainerSignatureDefinitions {
    ContainerSignatureDefinitions::new(
        vec![
            ContainerSignature::new(
                7,
                ContainerKind::Zip,
                vec![ContainerFile::new(
                    "mimetype",
                    vec![ByteSequenceRule::at_start("'application/epub+zip'").unwrap()],
                )],
            )
            .with_description("EPUB"),
            ContainerSignature::new(
                8,
                ContainerKind::Zip,
                vec![
                    ContainerFile::new(
                        "mimetype",
                        vec![ByteSequenceRule::at_start(
                            "'application/vnd.oasis.opendocument.text'",
                        )
                        .unwrap()],
                    ),
                    ContainerFile::present("content.xml"),
                ],
            )
            .with_description("OpenDocument Text"),
            ContainerSignature::new(
                9,
                ContainerKind::Zip,
                vec![ContainerFile::present("META-INF/container.xml")],
            )
            .with_description("OCF container"),
            ContainerSignature::new(
                20,
                ContainerKind::Ole2,
                vec![ContainerFile::new(
                    "WordDocument",
                    vec![ByteSequenceRule::at_start("ECA5").unwrap()],
                )],
            )
            .with_description("Word 97-2003"),
            ContainerSignature::new(
                21,
                ContainerKind::Ole2,
                vec![ContainerFile::present("ObjectPool/_1234/Ole10Native")],
            )
            .with_description("Embedded package"),
        ],
        vec![
            FileFormatMapping::new(7, "fmt/1040"),
            FileFormatMapping::new(8, "fmt/291"),
            FileFormatMapping::new(9, "fmt/1040"),
            FileFormatMapping::new(20, "fmt/40"),
            FileFormatMapping::new(21, "x-fmt/430"),
        ],
    )
}

pub fn epub() -> Vec<u8> {
    ZipBuilder::new()
        .stored("mimetype", b"application/epub+zip")
        .deflated("META-INF/container.xml", b"<?xml version=\"1.0\"?><container/>")
        .deflated("OEBPS/content.opf", b"<package/>")
        .build()
}

pub fn word_document() -> Vec<u8> {
    let mut word = vec![0xEC, 0xA5, 0xC1, 0x00];
    word.extend(vec![0u8; 600]);
    Ole2Builder::new()
        .stream("WordDocument", &word)
        .stream("1Table", &[0u8; 5000])
        .stream("\u{5}SummaryInformation", b"summary")
        .build()
}
