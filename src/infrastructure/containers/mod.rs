//! Container parsers

pub mod ole2;
pub mod zip;

pub use ole2::Ole2EntryReader;
pub use zip::ZipEntryReader;

use crate::domain::entities::ContainerKind;
use crate::domain::repositories::ContainerEntryReader;

/// The entry reader for a container kind
pub fn reader_for(kind: ContainerKind, verify_crc: bool) -> Box<dyn ContainerEntryReader> {
    match kind {
        ContainerKind::Zip => Box::new(ZipEntryReader::new(verify_crc)),
        ContainerKind::Ole2 => Box::new(Ole2EntryReader::new()),
    }
}
