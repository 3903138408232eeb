//! Pre-flight checks for probe-attach
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Minimum kernel version with perf-link based kprobes and uprobes
const MIN_KERNEL_VERSION: (u32, u32) = (4, 17);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns the first unmet requirement.
pub fn run_preflight_checks(object_path: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_object_exists(object_path)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON + CAP_NET_RAW would do, but checking capabilities
    // needs more than libc gives us
    bail!(
        "Permission denied: probe-attach requires root privileges to load eBPF programs.\n\n\
         Run with: sudo probe-attach ..."
    );
}

/// Check if the kernel version is sufficient for the probes we attach
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");
    let Some(version) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if version < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {}.{} is too old.\n\n\
             probe-attach requires Linux {}.{} or newer.\n\
             Current kernel: {}",
            version.0,
            version.1,
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
            release
        );
    }

    Ok(())
}

/// "6.1.0-arch1-1" -> (6, 1)
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check if the eBPF object file exists
fn check_object_exists(object_path: &Path) -> Result<()> {
    if !object_path.is_file() {
        bail!(
            "eBPF object not found: {}\n\n\
             --object must point to a compiled eBPF object file.",
            object_path.display()
        );
    }
    Ok(())
}

/// Check if the target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` does not exist.
pub fn check_process_exists(pid: i32) -> Result<()> {
    let proc_path = format!("/proc/{pid}");
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {pid} not found.\n\n\
             Is the process still running? Check with: ps -p {pid}"
        );
    }
    Ok(())
}

/// Check if we can read the process's memory maps
///
/// Library probes silently attach nothing when the maps are unreadable, so
/// surface the reason up front.
///
/// # Errors
/// Returns an error if `/proc/<pid>/maps` cannot be read.
pub fn check_proc_access(pid: i32) -> Result<()> {
    let maps_path = format!("/proc/{pid}/maps");
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {pid})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted"
        )
    })?;
    Ok(())
}
