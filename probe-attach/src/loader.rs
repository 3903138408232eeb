//! Loading the compiled eBPF object

use anyhow::{bail, Context, Result};
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::{info, warn};
use std::path::Path;

use crate::domain::ProgramId;

/// Load a compiled eBPF object file
///
/// Programs are only parsed here; each one is loaded into the kernel the
/// first time it is attached.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid eBPF object.
pub fn load_object(path: &Path) -> Result<Ebpf> {
    let bpf = Ebpf::load_file(path)
        .with_context(|| format!("Failed to load eBPF object {}", path.display()))?;
    info!("Loaded eBPF object {} ({} programs)", path.display(), bpf.programs().count());
    Ok(bpf)
}

/// Forward `aya-log` output of the programs to the `log` facade
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        // objects built without aya-log have no log map
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Check that every referenced program exists in the object
///
/// # Errors
/// Lists all missing program names.
pub fn check_programs(bpf: &Ebpf, programs: &[ProgramId]) -> Result<()> {
    let missing: Vec<&str> =
        programs.iter().map(ProgramId::as_str).filter(|name| bpf.program(name).is_none()).collect();
    if !missing.is_empty() {
        bail!("Programs not found in eBPF object: {}", missing.join(", "));
    }
    Ok(())
}
