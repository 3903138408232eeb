//! Periodic library rescans of one process
//!
//! The inode registry keeps mapped libraries from being hooked twice, but a
//! library resolved through the main executable (static fallback) has no
//! inode recorded. [`LibraryRescan`] remembers those libraries and leaves
//! them out of later scans for as long as they stay unmapped.

use log::debug;
use std::collections::BTreeSet;

use crate::catalog::LibraryProbes;
use crate::domain::{AttachError, Pid};
use crate::instrumenter::{Backend, Instrumenter};
use crate::procmaps::{find_library, Mapping, ProcessMaps};
use crate::tracer::{Closers, InstrumentedLibs, Tracer};

/// Library rescan state for one process
#[derive(Debug, Default)]
pub struct LibraryRescan {
    statically_linked: BTreeSet<String>,
}

impl LibraryRescan {
    /// Start tracking after an initial library pass over `pid`
    ///
    /// Libraries of `tracer` that `pid` does not map were handled through the
    /// executable by that pass.
    pub fn after_initial_scan(pid: Pid, maps: &impl ProcessMaps, tracer: &impl Tracer) -> Self {
        let mut rescan = Self::default();
        rescan.remember_fallbacks(&maps.mappings(pid), &tracer.library_probes());
        rescan
    }

    /// Libraries currently treated as linked into the executable
    pub fn statically_linked(&self) -> impl Iterator<Item = &str> {
        self.statically_linked.iter().map(String::as_str)
    }

    /// Run library probes again, skipping libraries already resolved
    /// through the executable unless the process has mapped them since
    ///
    /// Returns the number of new release handles.
    ///
    /// # Errors
    /// Whatever [`Instrumenter::library_probes`] reports.
    pub fn run<B: Backend>(
        &mut self,
        instrumenter: &mut Instrumenter<B>,
        pid: Pid,
        maps: &impl ProcessMaps,
        tracer: &mut impl Tracer,
    ) -> Result<usize, AttachError> {
        let mappings = maps.mappings(pid);
        let skip: BTreeSet<String> = self
            .statically_linked
            .iter()
            .filter(|library| find_library(library, &mappings).is_none())
            .cloned()
            .collect();

        let before = tracer.closers().len();
        let mut pending = Pending { tracer, skip: &skip };
        instrumenter.library_probes(pid, maps, &mut pending)?;
        let added = pending.closers().len() - before;

        let attempted = pending.library_probes();
        self.remember_fallbacks(&mappings, &attempted);
        Ok(added)
    }

    fn remember_fallbacks(&mut self, mappings: &[Mapping], libraries: &LibraryProbes) {
        if mappings.is_empty() {
            // nothing was attempted
            return;
        }
        for library in libraries.keys() {
            let mapped = find_library(library, mappings).is_some();
            if mapped {
                self.statically_linked.remove(library);
            } else if self.statically_linked.insert(library.clone()) {
                debug!("{library} resolved through the executable, not rescanning it");
            }
        }
    }
}

/// A tracer with some of its libraries hidden
struct Pending<'a, T> {
    tracer: &'a mut T,
    skip: &'a BTreeSet<String>,
}

impl<T: Tracer> Tracer for Pending<'_, T> {
    fn library_probes(&self) -> LibraryProbes {
        let mut probes = self.tracer.library_probes();
        probes.retain(|library, _| !self.skip.contains(library));
        probes
    }

    fn instrumented_libs(&mut self) -> &mut InstrumentedLibs {
        self.tracer.instrumented_libs()
    }

    fn closers(&mut self) -> &mut Closers {
        self.tracer.closers()
    }
}
