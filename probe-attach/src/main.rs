//! # probe-attach - Main Entry Point
//!
//! Loads an eBPF object, attaches the probes described in a JSON file to the
//! kernel and (optionally) to one process, then keeps them attached until
//! Ctrl+C or until the process exits. With `--rescan`, libraries the process
//! maps later are picked up periodically.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use probe_attach::cli::Args;
use probe_attach::config::{load_offsets, load_probe_set};
use probe_attach::domain::Pid;
use probe_attach::instrumenter::{AyaBackend, Executable, Image, Instrumenter};
use probe_attach::loader::{check_programs, init_ebpf_logger, load_object};
use probe_attach::preflight::{check_proc_access, check_process_exists, run_preflight_checks};
use probe_attach::procmaps::{ProcFs, ProcessMaps};
use probe_attach::rescan::LibraryRescan;
use probe_attach::tracer::Tracer;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run(args: &Args) -> Result<()> {
    if !args.no_preflight {
        run_preflight_checks(&args.object)?;
        if let Some(pid) = args.pid {
            check_process_exists(pid)?;
            check_proc_access(pid)?;
        }
    }

    let mut tracer = load_probe_set(&args.probes)?;
    let mut bpf = load_object(&args.object)?;
    init_ebpf_logger(&mut bpf);
    check_programs(&bpf, &tracer.programs())?;

    let pid = args.pid.map(Pid);
    let maps = ProcFs::default();

    let mut backend = AyaBackend::new(&mut bpf);
    if let (true, Some(pid)) = (args.pid_filter, pid) {
        backend = backend.with_pid_filter(pid.0);
    }
    let mut instrumenter = Instrumenter::new(backend);
    if let (Some(pid), Some(offsets_path)) = (pid, &args.offsets) {
        instrumenter = instrumenter.with_executable(executable(&maps, pid, offsets_path)?);
    }

    if let Err(e) = instrumenter.attach_all(pid, &maps, &mut tracer) {
        let attached = tracer.closers().len();
        tracer.closers().close_all();
        return Err(e).with_context(|| format!("Attaching probes failed ({attached} released)"));
    }

    if !args.quiet {
        println!("probe-attach v{}", env!("CARGO_PKG_VERSION"));
        if let Some(pid) = pid {
            println!("pid: {}", pid.0);
        }
        println!("attached: {}", tracer.closers().len());
        println!("libraries: {}", tracer.instrumented_libs().len());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let rescan_every = (args.rescan > 0).then(|| Duration::from_secs(args.rescan));
    let mut rescan = pid.map(|pid| LibraryRescan::after_initial_scan(pid, &maps, &tracer));
    let mut last_scan = Instant::now();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(pid) = pid {
            if !Path::new(&format!("/proc/{}", pid.0)).exists() {
                exit_reason = "process exited";
                break;
            }

            if let (Some(every), Some(rescan)) = (rescan_every, rescan.as_mut()) {
                if last_scan.elapsed() >= every {
                    match rescan.run(&mut instrumenter, pid, &maps, &mut tracer) {
                        Ok(0) => {}
                        Ok(added) => info!("Rescan of {pid} attached {added} new probes"),
                        Err(e) => warn!("Rescan of {pid} failed: {e:#}"),
                    }
                    last_scan = Instant::now();
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(500)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    let attached = tracer.closers().len();
    let failed = tracer.closers().close_all();
    if !args.quiet {
        eprintln!("\n{exit_reason}: released {attached} attachments ({failed} errors)");
    }

    Ok(())
}

/// Main executable of `pid` together with the offsets resolved for it
fn executable(maps: &ProcFs, pid: Pid, offsets_path: &Path) -> Result<Executable> {
    let offsets = load_offsets(offsets_path)?;
    let exe_path = maps.executable(pid);
    let image = Image::open(exe_path.as_str()).with_context(|| format!("Cannot open {exe_path}"))?;
    info!("Main-binary probes target {exe_path} ({} functions resolved)", offsets.funcs.len());
    Ok(Executable { image, offsets })
}
