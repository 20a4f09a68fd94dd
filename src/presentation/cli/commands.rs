//! CLI commands using clap

use clap::Parser;
use std::path::PathBuf;

/// container-id - Container format identification
///
/// Identifies the formats of ZIP and OLE2 files by the entries they hold,
/// using a JSON file of container signature definitions.
#[derive(Parser, Debug)]
#[command(name = "container-id")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Container signature definitions (JSON)
    #[arg(short = 's', long)]
    pub signatures: PathBuf,

    /// Container kind the files are expected to be (ZIP, OLE2)
    #[arg(short, long, default_value = "ZIP")]
    pub kind: String,

    /// Files to identify
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory for spooled inputs (defaults to the system temp dir)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Bytes of each entry rules may inspect (-1 = unbounded)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub scan_budget: i64,

    /// Skip CRC-32 verification of ZIP entries
    #[arg(long)]
    pub no_crc: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
