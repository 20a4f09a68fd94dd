#![no_main]

use container_puid::ScanBudget;
use container_puid::domain::entities::UniqueFileEntries;
use container_puid::domain::repositories::ContainerEntryReader;
use container_puid::infrastructure::containers::ZipEntryReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let wanted: UniqueFileEntries = ["mimetype", "content.xml", "[Content_Types].xml"]
        .into_iter()
        .collect();
    let reader = ZipEntryReader::default();
    let _ = reader.read_entries_within(data, &wanted, ScanBudget::Bytes(256));
    let _ = reader.read_entries(data, &wanted);
});
