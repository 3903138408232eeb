//! # Probe attachment
//!
//! Places a tracer's programs into the kernel and into a running process.
//!
//! ## Entry points
//!
//! - [`Instrumenter::kernel_probes()`] - kprobes/kretprobes by kernel symbol
//! - [`Instrumenter::binary_probes()`] - uprobes at resolved offsets of the
//!   main executable, one per return instruction for return programs
//! - [`Instrumenter::library_probes()`] - uprobes/uretprobes by symbol in
//!   shared libraries, or in the executable when the library is linked
//!   statically; deduplicated per library inode
//! - [`Instrumenter::socket_filters()`] - filters on raw packet sockets
//!
//! Every successful hook produces a [`Closer`] which is moved into the
//! tracer's closer list as soon as the function it belongs to is done, so a
//! later failure never leaks hooks that were already created.
//!
//! ## Failure policy
//!
//! | Situation                                  | Outcome            |
//! |--------------------------------------------|--------------------|
//! | function missing from offsets              | skipped (trace)    |
//! | library not mapped                         | executable tried   |
//! | process maps unreadable                    | nothing to do      |
//! | optional library probe fails               | skipped (debug)    |
//! | process exited before image could be opened| nothing to do      |
//! | process exited under a required lib probe  | nothing to do      |
//! | anything else                              | [`AttachError`]    |

pub mod backend;

use log::{debug, info, trace};

pub use backend::{AyaBackend, Backend, Image, Location, ProbeKind, Target};

use crate::catalog::{FunctionPrograms, Offsets, Probe};
use crate::closer::Closer;
use crate::domain::{AttachError, Pid, ProbeError};
use crate::procmaps::{find_library, ProcessMaps};
use crate::tracer::Tracer;

/// Main executable of the traced process, with the offsets resolved for it
#[derive(Debug, Clone)]
pub struct Executable {
    pub image: Image,
    pub offsets: Offsets,
}

/// Attaches tracer programs through a [`Backend`]
pub struct Instrumenter<B> {
    backend: B,
    exe: Option<Executable>,
}

impl<B: Backend> Instrumenter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, exe: None }
    }

    /// Enable main-binary probes against `exe`
    #[must_use]
    pub fn with_executable(mut self, exe: Executable) -> Self {
        self.exe = Some(exe);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run every attachment strategy in order: kernel, main binary,
    /// libraries (when a pid is known), socket filters
    ///
    /// # Errors
    /// Stops at the first fatal error of any strategy.
    pub fn attach_all(
        &mut self,
        pid: Option<Pid>,
        maps: &impl ProcessMaps,
        tracer: &mut impl Tracer,
    ) -> Result<(), AttachError> {
        self.kernel_probes(tracer)?;
        self.binary_probes(tracer)?;
        if let Some(pid) = pid {
            self.library_probes(pid, maps, tracer)?;
        }
        self.socket_filters(tracer)
    }

    /// Attach main-binary probes at the offsets resolved for the executable
    ///
    /// Calling this twice for the same process attaches everything twice;
    /// there is no deduplication for main-binary probes.
    ///
    /// # Errors
    /// Any attachment failure, wrapped with the function name.
    pub fn binary_probes(&mut self, tracer: &mut impl Tracer) -> Result<(), AttachError> {
        let Self { backend, exe } = self;
        let probes = tracer.binary_probes();
        let Some(exe) = exe else {
            if !probes.is_empty() {
                debug!("No executable configured, ignoring {} main-binary probes", probes.len());
            }
            return Ok(());
        };

        for (function, programs) in probes {
            let Some(offsets) = exe.offsets.get(&function) else {
                // the executable does not contain this function
                trace!("Ignoring function {function}: not in detected offsets");
                continue;
            };
            if programs.is_empty() {
                trace!("Ignoring function {function}: no programs");
                continue;
            }
            debug!(
                "Going to instrument function {function} at 0x{:x} ({} returns)",
                offsets.entry,
                offsets.returns.len()
            );

            let mut handles = Vec::new();
            let probe = Probe { offsets, programs: &programs };
            let result = attach_offsets(&mut *backend, &exe.image, probe, &mut handles);
            tracer.closers().extend(handles);
            result.map_err(|source| AttachError::Function { function, source })?;
        }

        Ok(())
    }

    /// Attach kprobes and kretprobes by kernel symbol name
    ///
    /// # Errors
    /// Any attachment failure, wrapped with the kernel function name.
    pub fn kernel_probes(&mut self, tracer: &mut impl Tracer) -> Result<(), AttachError> {
        for (function, programs) in tracer.kernel_probes() {
            if programs.is_empty() {
                trace!("Ignoring kernel function {function}: no programs");
                continue;
            }
            debug!("Going to add kprobes to function {function}");

            let mut handles = Vec::new();
            let backend = &mut self.backend;
            let result = attach_symbol(backend, Target::Kernel, &function, &programs, &mut handles);
            tracer.closers().extend(handles);
            result.map_err(|source| AttachError::Function { function, source })?;
        }

        Ok(())
    }

    /// Attach library probes into the libraries mapped by `pid`
    ///
    /// Libraries found in the process map are opened through
    /// `/proc/<pid>/map_files` and recorded by inode once all their functions
    /// have been tried, so rescanning the same process is a no-op. Libraries
    /// not mapped at all are looked up in the main executable (statically
    /// linked), which is never recorded.
    ///
    /// # Errors
    /// Failure to open an image, or failure of a required probe.
    pub fn library_probes(
        &mut self,
        pid: Pid,
        maps: &impl ProcessMaps,
        tracer: &mut impl Tracer,
    ) -> Result<(), AttachError> {
        let mappings = maps.mappings(pid);
        if mappings.is_empty() {
            info!("Didn't find any process maps for {pid}, not instrumenting shared libraries");
            return Ok(());
        }

        for (library, probes) in tracer.library_probes() {
            debug!("Finding library {library}");
            let mut inode = None;

            let path = if let Some(mapping) = find_library(&library, &mappings) {
                let file = maps.mapped_file(pid, mapping);
                debug!("Instrumenting library {library} at {} through {}", mapping.path, file.path);
                if let Some(ino) = file.inode {
                    if tracer.instrumented_libs().contains(ino) {
                        debug!("Library {library} ({ino}) already instrumented");
                        continue;
                    }
                    debug!("Found {ino} for {library}, recording it if instrumentation succeeds");
                    inode = Some(ino);
                }
                file.path
            } else {
                // e.g. runtimes shipping OpenSSL statically linked into their binary
                let exe = maps.executable(pid);
                debug!("{library} not linked, attempting to instrument executable {exe}");
                exe
            };

            let image = match self.backend.open_image(&path) {
                Ok(image) => image,
                Err(e) if e.is_process_gone() => {
                    debug!("{pid} went away before {path} could be opened: {e}");
                    return Ok(());
                }
                Err(source) => return Err(AttachError::OpenImage { library, path, source }),
            };

            for (function, programs) in &probes {
                if programs.is_empty() {
                    trace!("Ignoring function {function} in {library}: no programs");
                    continue;
                }
                debug!("Going to instrument function {function} in {library}");

                let mut handles = Vec::new();
                let target = Target::Image(&image);
                let backend = &mut self.backend;
                let result = attach_symbol(backend, target, function, programs, &mut handles);
                tracer.closers().extend(handles);

                if let Err(source) = result {
                    if programs.required {
                        // only when the maps are gone too, ENOENT also means "no such symbol"
                        if source.is_process_gone() && maps.mappings(pid).is_empty() {
                            debug!("{pid} went away while instrumenting {function}: {source}");
                            return Ok(());
                        }
                        return Err(AttachError::Function { function: function.clone(), source });
                    }
                    // expected when the process doesn't load this library at all
                    debug!("Error instrumenting uprobe {function} in {library}: {source}");
                }
            }

            if let Some(ino) = inode {
                tracer.instrumented_libs().record(ino);
            }
        }

        Ok(())
    }

    /// Open one raw packet socket per filter program and attach the filter
    ///
    /// # Errors
    /// Socket creation or attachment failure, wrapped with the program name.
    pub fn socket_filters(&mut self, tracer: &mut impl Tracer) -> Result<(), AttachError> {
        for program in tracer.socket_filters() {
            debug!("Going to attach socket filter {program}");
            let attached = match self.backend.open_packet_socket() {
                Ok(socket) => self.backend.attach_socket_filter(&program, socket),
                Err(e) => Err(e),
            };
            let closer = attached.map_err(|source| AttachError::SocketFilter { program, source })?;
            tracer.closers().extend([closer]);
        }

        Ok(())
    }
}

/// Entry program at the entry offset, return program at every return offset
fn attach_offsets(
    backend: &mut impl Backend,
    image: &Image,
    probe: Probe<'_>,
    handles: &mut Vec<Closer>,
) -> Result<(), ProbeError> {
    let target = Target::Image(image);
    if let Some(program) = &probe.programs.entry {
        let location = Location::Offset(probe.offsets.entry);
        handles.push(backend.attach_probe(target, ProbeKind::Entry, location, program)?);
    }
    if let Some(program) = &probe.programs.ret {
        // no uretprobe: the return address on the stack can't be trusted for
        // every runtime, so probe each return instruction instead
        for &ret in &probe.offsets.returns {
            let location = Location::Offset(ret);
            handles.push(backend.attach_probe(target, ProbeKind::Return, location, program)?);
        }
    }
    Ok(())
}

/// Entry and return programs at `symbol` in `target`
fn attach_symbol(
    backend: &mut impl Backend,
    target: Target<'_>,
    symbol: &str,
    programs: &FunctionPrograms,
    handles: &mut Vec<Closer>,
) -> Result<(), ProbeError> {
    if let Some(program) = &programs.entry {
        let location = Location::Symbol(symbol);
        handles.push(backend.attach_probe(target, ProbeKind::Entry, location, program)?);
    }
    if let Some(program) = &programs.ret {
        let location = Location::Symbol(symbol);
        handles.push(backend.attach_probe(target, ProbeKind::Return, location, program)?);
    }
    Ok(())
}
