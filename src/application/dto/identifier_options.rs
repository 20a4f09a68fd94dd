//! Identifier options DTO

use crate::domain::services::ScanBudget;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options for building a container identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierOptions {
    /// Directory for spooled inputs
    pub scratch_dir: PathBuf,
    /// How far into an entry rules may look (-1 = unbounded)
    pub scan_budget: ScanBudget,
    /// Inputs up to this many bytes are kept in memory instead of spooled
    pub memory_threshold: usize,
    /// Check ZIP entry CRC-32 values after decompression
    pub verify_crc: bool,
    /// Evaluate signatures on the rayon pool
    pub parallel: bool,
}

impl Default for IdentifierOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            scan_budget: ScanBudget::Unbounded,
            memory_threshold: 8 * 1024 * 1024, // 8MB
            verify_crc: true,
            parallel: true,
        }
    }
}

impl IdentifierOptions {
    /// Creates options spooling into `scratch_dir`
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_scan_budget(mut self, budget: ScanBudget) -> Self {
        self.scan_budget = budget;
        self
    }

    /// Keeps inputs of at most `bytes` in memory
    pub fn in_memory_below(mut self, bytes: usize) -> Self {
        self.memory_threshold = bytes;
        self
    }

    /// Always spools inputs to the scratch directory
    pub fn always_spool(self) -> Self {
        self.in_memory_below(0)
    }

    pub fn without_crc_check(mut self) -> Self {
        self.verify_crc = false;
        self
    }

    /// Disables parallel signature evaluation
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}
