//! Probe and offset descriptions loaded from JSON files

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::catalog::Offsets;
use crate::tracer::ProbeSet;

/// Load the probes to attach
///
/// # Errors
/// Returns an error if the file cannot be opened or is not a valid description.
pub fn load_probe_set(path: &Path) -> Result<ProbeSet> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid probe description in {}", path.display()))
}

/// Load function offsets resolved for the target executable
///
/// # Errors
/// Returns an error if the file cannot be opened or is not a valid offsets file.
pub fn load_offsets(path: &Path) -> Result<Offsets> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid offsets in {}", path.display()))
}
