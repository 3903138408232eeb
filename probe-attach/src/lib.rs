//! # probe-attach - eBPF instrumentation attacher
//!
//! Given a running process and a set of compiled eBPF programs, decides where
//! the programs must be hooked, attaches them, keeps what was attached so it
//! can be released later, and avoids instrumenting the same shared library
//! twice.
//!
//! ## Architecture Overview
//!
//! ```text
//!  probes.json ──▶ ProbeSet (Tracer) ─────────┐
//!  offsets.json ─▶ Offsets ──▶ Executable ─┐  │
//!  /proc/<pid>/maps ─▶ ProcFs ──────────┐  │  │
//!                                       ▼  ▼  ▼
//!                                  ┌──────────────┐
//!                                  │ Instrumenter │
//!                                  └──────┬───────┘
//!                                         │ Backend (aya)
//!            ┌──────────────┬─────────────┼──────────────┐
//!            ▼              ▼             ▼              ▼
//!         kprobes     main-binary    library probes  socket filters
//!                     uprobes        (inode dedup)   (AF_PACKET)
//!            └──────────────┴──────┬──────┴──────────────┘
//!                                  ▼
//!                        Closers (owned by the Tracer)
//! ```
//!
//! ## Module Structure
//!
//! - [`instrumenter`]: the four attachment strategies and the [`Backend`]
//!   seam, with the aya implementation
//! - [`tracer`]: what a traced entity wants hooked, its instrumented-library
//!   registry and its release handles
//! - [`catalog`]: function offsets and entry/return program pairs
//! - [`procmaps`]: `/proc/<pid>/maps` parsing and `map_files` resolution
//! - [`rescan`]: periodic library rescans that skip statically linked
//!   libraries already hooked through the executable
//! - [`closer`]: release handles for live attachments
//! - [`endian`], [`socket`]: raw packet sockets for filters
//! - [`loader`], [`config`], [`preflight`], [`cli`]: the binary's plumbing
//! - [`domain`]: newtypes and error types
//!
//! ## Key Concepts
//!
//! - **Uprobes at return offsets**: return programs of main-binary probes are
//!   placed on every return instruction instead of using a uretprobe, which
//!   some runtimes (Go) break by moving stacks
//! - **`map_files`**: libraries are opened through
//!   `/proc/<pid>/map_files/<range>` so they can be hooked even when their
//!   path only exists inside the process's mount namespace
//! - **Static fallback**: a library missing from the process map is looked
//!   up in the executable itself (statically linked OpenSSL)
//!
//! [`Backend`]: instrumenter::Backend

pub mod catalog;
pub mod cli;
pub mod closer;
pub mod config;
pub mod domain;
pub mod endian;
pub mod instrumenter;
pub mod loader;
pub mod preflight;
pub mod procmaps;
pub mod rescan;
pub mod socket;
pub mod tracer;
