//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "probe-attach",
    about = "Attach compiled eBPF programs to the kernel, a process and its libraries",
    after_help = "\
EXAMPLES:
    sudo probe-attach -o http.bpf.o --probes probes.json                 Kernel probes and socket filters only
    sudo probe-attach -o http.bpf.o --probes probes.json --pid 1234      Also hook libraries mapped by 1234
    sudo probe-attach -o go.bpf.o --probes probes.json --pid 1234 \\
         --offsets offsets.json --rescan 5                               Main-binary probes, rescan every 5s"
)]
pub struct Args {
    /// Compiled eBPF object holding the programs
    #[arg(short, long, value_name = "FILE")]
    pub object: PathBuf,

    /// JSON description of the probes to attach
    #[arg(long, value_name = "FILE")]
    pub probes: PathBuf,

    /// Process to instrument (enables library probes)
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// JSON function offsets of the process's executable (enables main-binary probes)
    #[arg(long, value_name = "FILE", requires = "pid")]
    pub offsets: Option<PathBuf>,

    /// Re-scan the process for newly mapped libraries every N seconds (0 = never)
    #[arg(long, default_value = "0", requires = "pid")]
    pub rescan: u64,

    /// Fire user probes only in the target process, not in every process mapping the same file
    #[arg(long, requires = "pid")]
    pub pid_filter: bool,

    /// Skip privilege and kernel version checks
    #[arg(long)]
    pub no_preflight: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Log attachment decisions (same as RUST_LOG=debug)
    #[arg(short, long)]
    pub verbose: bool,
}
