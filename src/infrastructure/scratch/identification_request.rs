//! Identification request
//!
//! Holds the complete bytes of one input stream for the duration of a
//! `process` call. Small inputs stay in memory; larger ones are spooled to
//! a private temporary file in the scratch directory and memory-mapped, so
//! container parsers always see one contiguous slice.

use crate::domain::entities::RequestMetaData;
use crate::error::ConstructionError;
use memmap2::Mmap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where and when inputs are spooled to disk
#[derive(Debug, Clone)]
pub struct ScratchArea {
    dir: PathBuf,
    memory_threshold: usize,
}

impl ScratchArea {
    /// Checks that `dir` is an existing directory
    pub fn new(dir: impl Into<PathBuf>, memory_threshold: usize) -> Result<Self, ConstructionError> {
        let dir = dir.into();
        let metadata = std::fs::metadata(&dir).map_err(|e| ConstructionError::ScratchDir {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(ConstructionError::ScratchDir {
                path: dir,
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self {
            dir,
            memory_threshold,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn memory_threshold(&self) -> usize {
        self.memory_threshold
    }
}

enum Storage {
    Memory(Vec<u8>),
    Spooled { map: Mmap, file: NamedTempFile },
}

/// The fully buffered content of one input
pub struct IdentificationRequest {
    metadata: RequestMetaData,
    storage: Storage,
}

impl IdentificationRequest {
    /// Reads `input` to its end, keeping it in memory when it fits within
    /// the threshold and spooling it to the scratch area otherwise.
    pub fn open<R: Read>(
        mut input: R,
        metadata: RequestMetaData,
        scratch: &ScratchArea,
    ) -> io::Result<Self> {
        let limit = scratch.memory_threshold as u64;
        let mut head = Vec::new();
        input.by_ref().take(limit.saturating_add(1)).read_to_end(&mut head)?;

        let storage = if head.len() as u64 <= limit {
            Storage::Memory(head)
        } else {
            let mut file = tempfile::Builder::new()
                .prefix("container-")
                .suffix(".spool")
                .tempfile_in(&scratch.dir)?;
            file.write_all(&head)?;
            drop(head);
            io::copy(&mut input, &mut file)?;
            file.flush()?;

            // SAFETY: the temp file is private to this request and is not
            // written again while the map is alive.
            let map = unsafe { Mmap::map(file.as_file())? };
            tracing::debug!(path = %file.path().display(), bytes = map.len(), "spooled input");
            Storage::Spooled { map, file }
        };

        let mut request = Self { metadata, storage };
        let len = request.len() as u64;
        request.metadata.size.get_or_insert(len);
        Ok(request)
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Memory(bytes) => bytes.as_slice(),
            Storage::Spooled { map, .. } => &map[..],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn metadata(&self) -> &RequestMetaData {
        &self.metadata
    }

    /// Path of the spool file, if the input was spooled
    pub fn spool_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::Spooled { file, .. } => Some(file.path()),
        }
    }

    /// Releases the request and deletes any spool file, reporting a failed
    /// deletion.
    pub fn close(self) -> io::Result<()> {
        match self.storage {
            Storage::Memory(_) => Ok(()),
            Storage::Spooled { map, file } => {
                drop(map);
                file.close()
            }
        }
    }
}

impl std::fmt::Debug for IdentificationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentificationRequest")
            .field("metadata", &self.metadata)
            .field("len", &self.len())
            .field("spool_path", &self.spool_path())
            .finish()
    }
}
