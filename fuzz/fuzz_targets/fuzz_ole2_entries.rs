#![no_main]

use container_puid::domain::entities::UniqueFileEntries;
use container_puid::domain::repositories::ContainerEntryReader;
use container_puid::infrastructure::containers::Ole2EntryReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let wanted: UniqueFileEntries = ["WordDocument", "Workbook", "ObjectPool/_1/Ole10Native"]
        .into_iter()
        .collect();
    let _ = Ole2EntryReader::new().read_entries(data, &wanted);
});
