//! ZIP archive parser implementation
//!
//! Locates the end-of-central-directory record, walks the central directory
//! and resolves each entry's data through its local file header. ZIP64
//! archives are followed through the ZIP64 locator and extra fields.

use crate::domain::entities::{ContainerKind, UniqueFileEntries};
use crate::domain::repositories::{ContainerEntries, ContainerEntryReader, EntryView, EntryWindow};
use crate::domain::services::ScanBudget;
use crate::error::ContainerError;
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use std::collections::VecDeque;
use std::io::{self, Read};

const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const EOCD_SIZE: usize = 22;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
const ZIP64_LOCATOR_SIZE: usize = 20;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;
const ZIP64_EOCD_SIZE: usize = 56;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4B50;
const CENTRAL_HEADER_SIZE: usize = 46;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4B50;
const LOCAL_HEADER_SIZE: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Initial allocation cap for inflated entries; the declared size of a
/// hostile archive is not trusted up front
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

const INFLATE_CHUNK: usize = 64 * 1024;

/// Borrowed fixed-size record at `offset`
fn record<'a>(
    data: &'a [u8],
    offset: u64,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ContainerError> {
    let start = usize::try_from(offset).map_err(|_| ContainerError::Truncated { what, offset })?;
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or(ContainerError::Truncated { what, offset })
}

/// Location of the central directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralDirectory {
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
}

/// One parsed central directory file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralEntry {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

impl CentralEntry {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Structural parser over the bytes of a whole archive
pub struct ZipParser<'a> {
    data: &'a [u8],
    directory: CentralDirectory,
}

impl<'a> ZipParser<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, ContainerError> {
        let directory = Self::locate_central_directory(data)?;
        Ok(Self { data, directory })
    }

    pub fn central_directory(&self) -> CentralDirectory {
        self.directory
    }

    fn locate_central_directory(data: &[u8]) -> Result<CentralDirectory, ContainerError> {
        if data.len() < EOCD_SIZE {
            return Err(ContainerError::NotAContainer {
                kind: "ZIP",
                reason: format!("{} bytes is too small for an archive", data.len()),
            });
        }

        // The record sits at the very end, followed only by a comment
        let search_start = data.len().saturating_sub(EOCD_SIZE + MAX_COMMENT_LEN);
        let window = &data[search_start..];
        let eocd_offset = memchr::memmem::rfind_iter(window, &EOCD_SIGNATURE)
            .map(|index| search_start + index)
            .find(|&offset| {
                offset + EOCD_SIZE <= data.len() && {
                    let comment_len = LittleEndian::read_u16(&data[offset + 20..]) as usize;
                    offset + EOCD_SIZE + comment_len <= data.len()
                }
            })
            .ok_or_else(|| ContainerError::NotAContainer {
                kind: "ZIP",
                reason: "end of central directory record not found".to_string(),
            })?;

        let eocd = &data[eocd_offset..eocd_offset + EOCD_SIZE];
        let mut directory = CentralDirectory {
            entries: u64::from(LittleEndian::read_u16(&eocd[10..])),
            size: u64::from(LittleEndian::read_u32(&eocd[12..])),
            offset: u64::from(LittleEndian::read_u32(&eocd[16..])),
        };

        if let Some(zip64) = Self::read_zip64_directory(data, eocd_offset)? {
            directory = zip64;
        }

        let end = directory
            .offset
            .checked_add(directory.size)
            .ok_or_else(|| ContainerError::invalid("central directory", "size overflows"))?;
        if end > data.len() as u64 {
            return Err(ContainerError::Truncated {
                what: "central directory",
                offset: directory.offset,
            });
        }

        Ok(directory)
    }

    fn read_zip64_directory(
        data: &[u8],
        eocd_offset: usize,
    ) -> Result<Option<CentralDirectory>, ContainerError> {
        let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_LOCATOR_SIZE) else {
            return Ok(None);
        };
        let locator = &data[locator_offset..eocd_offset];
        if LittleEndian::read_u32(locator) != ZIP64_LOCATOR_SIGNATURE {
            return Ok(None);
        }

        let record_offset = LittleEndian::read_u64(&locator[8..]);
        let eocd64 = record(data, record_offset, ZIP64_EOCD_SIZE, "ZIP64 end of central directory")?;
        if LittleEndian::read_u32(eocd64) != ZIP64_EOCD_SIGNATURE {
            return Err(ContainerError::invalid(
                "ZIP64 end of central directory",
                "bad signature",
            ));
        }

        Ok(Some(CentralDirectory {
            entries: LittleEndian::read_u64(&eocd64[32..]),
            size: LittleEndian::read_u64(&eocd64[40..]),
            offset: LittleEndian::read_u64(&eocd64[48..]),
        }))
    }

    /// Iterates the central directory in stored order
    pub fn entries(&self) -> CentralEntries<'a> {
        CentralEntries {
            data: self.data,
            offset: self.directory.offset,
            end: self.directory.offset + self.directory.size,
            remaining: self.directory.entries,
        }
    }

    /// The raw (possibly compressed) bytes of an entry
    pub fn raw_data(&self, entry: &CentralEntry) -> Result<&'a [u8], ContainerError> {
        let header = record(
            self.data,
            entry.local_header_offset,
            LOCAL_HEADER_SIZE,
            "local file header",
        )?;
        if LittleEndian::read_u32(header) != LOCAL_HEADER_SIGNATURE {
            return Err(ContainerError::invalid(
                "local file header",
                format!("bad signature for entry '{}'", entry.name),
            ));
        }

        let name_len = u64::from(LittleEndian::read_u16(&header[26..]));
        let extra_len = u64::from(LittleEndian::read_u16(&header[28..]));
        let data_offset = entry.local_header_offset + LOCAL_HEADER_SIZE as u64 + name_len + extra_len;
        let len = usize::try_from(entry.compressed_size).map_err(|_| ContainerError::Truncated {
            what: "entry data",
            offset: data_offset,
        })?;

        record(self.data, data_offset, len, "entry data")
    }

    /// The decompressed content of an entry, or `None` when the entry is
    /// encrypted or uses a compression method other than stored/deflated.
    ///
    /// A deflated entry larger than `window` is inflated only as far as the
    /// window needs. Its checksum is verified whenever the whole stream was
    /// decoded.
    pub fn content(
        &self,
        entry: &CentralEntry,
        window: EntryWindow,
        verify_crc: bool,
    ) -> Result<Option<EntryView<'a>>, ContainerError> {
        if entry.is_encrypted() {
            tracing::warn!(entry = %entry.name, "skipping encrypted ZIP entry");
            return Ok(None);
        }

        let raw = self.raw_data(entry)?;
        let (view, actual) = match entry.method {
            METHOD_STORED => {
                if entry.compressed_size != entry.uncompressed_size {
                    return Err(ContainerError::invalid(
                        "stored entry",
                        format!(
                            "'{}' has compressed size {} but uncompressed size {}",
                            entry.name, entry.compressed_size, entry.uncompressed_size
                        ),
                    ));
                }
                (EntryView::borrowed(raw), verify_crc.then(|| crc32fast::hash(raw)))
            }
            METHOD_DEFLATED => {
                let inflated = inflate(raw, entry, window)?;
                (EntryView::owned(inflated.bytes), inflated.crc32)
            }
            method => {
                tracing::warn!(entry = %entry.name, method, "skipping ZIP entry with unsupported compression");
                return Ok(None);
            }
        };

        if let Some(actual) = actual.filter(|_| verify_crc) {
            if actual != entry.crc32 {
                return Err(ContainerError::CrcMismatch {
                    path: entry.name.clone(),
                    expected: entry.crc32,
                    actual,
                });
            }
        }

        Ok(Some(view))
    }
}

/// Output of [`inflate`]; `crc32` is `None` when decoding stopped early
#[derive(Debug)]
struct Inflated {
    bytes: Vec<u8>,
    crc32: Option<u32>,
}

fn inflate_error(entry: &CentralEntry) -> impl FnOnce(io::Error) -> ContainerError + '_ {
    move |source| ContainerError::Inflate {
        path: entry.name.clone(),
        source,
    }
}

fn size_mismatch(entry: &CentralEntry, actual: u64) -> ContainerError {
    ContainerError::invalid(
        "deflated entry",
        format!(
            "'{}' inflates to {} bytes, header declares {}",
            entry.name, actual, entry.uncompressed_size
        ),
    )
}

fn inflate(raw: &[u8], entry: &CentralEntry, window: EntryWindow) -> Result<Inflated, ContainerError> {
    let expected = entry.uncompressed_size;
    let (head, tail) = match window {
        EntryWindow::Ends { head, tail } if !window.covers(expected) => (head, tail),
        _ => return inflate_whole(raw, entry),
    };

    let mut decoder = DeflateDecoder::new(raw);
    let mut out = Vec::with_capacity(head.min(MAX_PREALLOCATION));
    (&mut decoder)
        .take(head as u64)
        .read_to_end(&mut out)
        .map_err(inflate_error(entry))?;
    if tail == 0 {
        return Ok(Inflated {
            bytes: out,
            crc32: None,
        });
    }

    // The tail is only known once the stream ends; keep a rolling copy of it
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    let mut total = out.len() as u64;
    let mut trailing: VecDeque<u8> = VecDeque::with_capacity(tail.min(MAX_PREALLOCATION));
    let mut chunk = vec![0u8; INFLATE_CHUNK];
    loop {
        let n = decoder.read(&mut chunk).map_err(inflate_error(entry))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > expected {
            return Err(size_mismatch(entry, total));
        }
        hasher.update(&chunk[..n]);
        trailing.extend(&chunk[..n]);
        if trailing.len() > tail {
            trailing.drain(..trailing.len() - tail);
        }
    }
    if total != expected {
        return Err(size_mismatch(entry, total));
    }

    // head and tail never overlap: the window does not cover the entry
    out.extend(trailing);
    Ok(Inflated {
        bytes: out,
        crc32: Some(hasher.finalize()),
    })
}

fn inflate_whole(raw: &[u8], entry: &CentralEntry) -> Result<Inflated, ContainerError> {
    let expected = entry.uncompressed_size;
    let capacity = usize::try_from(expected).unwrap_or(usize::MAX).min(MAX_PREALLOCATION);
    let mut out = Vec::with_capacity(capacity);

    // One byte past the declared size is enough to detect a lying header
    DeflateDecoder::new(raw)
        .take(expected.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(inflate_error(entry))?;

    if out.len() as u64 != expected {
        return Err(size_mismatch(entry, out.len() as u64));
    }
    let crc32 = crc32fast::hash(&out);
    Ok(Inflated { bytes: out, crc32: Some(crc32) })
}

/// Iterator over central directory file headers
pub struct CentralEntries<'a> {
    data: &'a [u8],
    offset: u64,
    end: u64,
    remaining: u64,
}

impl CentralEntries<'_> {
    fn parse_next(&mut self) -> Result<CentralEntry, ContainerError> {
        let offset = self.offset;
        if offset + CENTRAL_HEADER_SIZE as u64 > self.end {
            return Err(ContainerError::Truncated {
                what: "central directory header",
                offset,
            });
        }

        let header = record(self.data, offset, CENTRAL_HEADER_SIZE, "central directory header")?;
        if LittleEndian::read_u32(header) != CENTRAL_HEADER_SIGNATURE {
            return Err(ContainerError::invalid(
                "central directory header",
                format!("bad signature at offset {offset}"),
            ));
        }

        let name_len = LittleEndian::read_u16(&header[28..]) as usize;
        let extra_len = LittleEndian::read_u16(&header[30..]) as usize;
        let comment_len = LittleEndian::read_u16(&header[32..]) as usize;
        let variable = record(
            self.data,
            offset + CENTRAL_HEADER_SIZE as u64,
            name_len + extra_len,
            "central directory header",
        )?;

        let mut entry = CentralEntry {
            name: String::from_utf8_lossy(&variable[..name_len]).into_owned(),
            flags: LittleEndian::read_u16(&header[8..]),
            method: LittleEndian::read_u16(&header[10..]),
            crc32: LittleEndian::read_u32(&header[16..]),
            compressed_size: u64::from(LittleEndian::read_u32(&header[20..])),
            uncompressed_size: u64::from(LittleEndian::read_u32(&header[24..])),
            local_header_offset: u64::from(LittleEndian::read_u32(&header[42..])),
        };
        apply_zip64_extra(&mut entry, &variable[name_len..])?;

        self.offset = offset + (CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len) as u64;
        Ok(entry)
    }
}

impl Iterator for CentralEntries<'_> {
    type Item = Result<CentralEntry, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let parsed = self.parse_next();
        if parsed.is_err() {
            self.remaining = 0;
        }
        Some(parsed)
    }
}

/// Replaces saturated 32-bit fields with their ZIP64 extra-field values
fn apply_zip64_extra(entry: &mut CentralEntry, mut extra: &[u8]) -> Result<(), ContainerError> {
    const SATURATED: u64 = 0xFFFF_FFFF;

    while extra.len() >= 4 {
        let id = LittleEndian::read_u16(extra);
        let size = LittleEndian::read_u16(&extra[2..]) as usize;
        let Some(body) = extra.get(4..4 + size) else {
            return Err(ContainerError::invalid(
                "extra field",
                format!("field {id:#06x} of '{}' overruns the header", entry.name),
            ));
        };

        if id == ZIP64_EXTRA_ID {
            let mut values = body.chunks_exact(8).map(LittleEndian::read_u64);
            let mut next = |field: &mut u64| -> Result<(), ContainerError> {
                if *field == SATURATED {
                    *field = values.next().ok_or_else(|| {
                        ContainerError::invalid(
                            "ZIP64 extra field",
                            format!("missing value for '{}'", entry.name),
                        )
                    })?;
                }
                Ok(())
            };
            next(&mut entry.uncompressed_size)?;
            next(&mut entry.compressed_size)?;
            next(&mut entry.local_header_offset)?;
            return Ok(());
        }

        extra = &extra[4 + size..];
    }
    Ok(())
}

/// Container entry reader for ZIP archives
#[derive(Debug, Clone)]
pub struct ZipEntryReader {
    verify_crc: bool,
}

impl ZipEntryReader {
    pub fn new(verify_crc: bool) -> Self {
        Self { verify_crc }
    }
}

impl Default for ZipEntryReader {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ContainerEntryReader for ZipEntryReader {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Zip
    }

    fn read_entries_within<'a>(
        &self,
        container: &'a [u8],
        wanted: &UniqueFileEntries,
        budget: ScanBudget,
    ) -> Result<ContainerEntries<'a>, ContainerError> {
        let parser = ZipParser::new(container)?;
        let mut entries = ContainerEntries::new();

        for entry in parser.entries() {
            let entry = entry?;
            let Some(reach) = wanted.reach(&entry.name) else {
                continue;
            };
            if entries.contains(&entry.name) {
                continue;
            }
            if entry.is_directory() {
                entries.insert(entry.name, EntryView::borrowed(&[]));
                continue;
            }

            let window = EntryWindow::new(reach, budget);
            if let Some(view) = parser.content(&entry, window, self.verify_crc)? {
                entries.insert(entry.name, view);
            }
        }

        Ok(entries)
    }
}
