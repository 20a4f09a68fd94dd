//! Domain services
//!
//! Matching logic that operates on signatures and container entries.

mod match_collection;
mod signature_catalog;
pub mod signature_matcher;

pub use match_collection::MatchCollection;
pub use signature_catalog::SignatureCatalog;
pub use signature_matcher::{matches, ScanBudget};
