#![no_main]

use container_puid::BytePattern;
use container_puid::domain::services::{ScanBudget, matches};
use container_puid::{Anchor, ByteSequenceRule};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(split) = data.iter().position(|&b| b == b'\n') else {
        return;
    };
    let Ok(text) = std::str::from_utf8(&data[..split]) else {
        return;
    };
    let Ok(pattern) = text.parse::<BytePattern>() else {
        return;
    };

    // anything that parses must print back to an equivalent pattern
    let reparsed: BytePattern = pattern.to_string().parse().expect("display output parses");
    assert_eq!(reparsed, pattern);

    let entry = &data[split + 1..];
    for anchor in [Anchor::BeginningOfEntry, Anchor::EndOfEntry, Anchor::Variable] {
        if let Ok(rule) = ByteSequenceRule::new(anchor, 0, Some(16), pattern.clone()) {
            let _ = matches(entry, &rule, ScanBudget::Bytes(1024));
        }
    }
});
