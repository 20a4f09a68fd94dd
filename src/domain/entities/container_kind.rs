//! Container kinds the engine knows how to open.

use crate::error::ConstructionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The structural family of a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerKind {
    /// PKWARE ZIP archives (OOXML, ODF, EPUB, JAR, ...)
    Zip,
    /// Compound File Binary Format (legacy Office, MSI, ...)
    Ole2,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 2] = [ContainerKind::Zip, ContainerKind::Ole2];

    /// Returns the canonical name used in signature definitions
    pub const fn name(&self) -> &'static str {
        match self {
            ContainerKind::Zip => "ZIP",
            ContainerKind::Ole2 => "OLE2",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ContainerKind {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ContainerKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ConstructionError::UnsupportedKind(trimmed.to_string()))
    }
}
