//! Traced entities
//!
//! A [`Tracer`] describes what should be hooked for one monitored entity and
//! owns the state the attacher mutates on its behalf: the registry of
//! already-instrumented libraries and the list of release handles.

use log::debug;
use serde::Deserialize;
use std::collections::HashSet;

use crate::catalog::{LibraryProbes, ProbeMap};
use crate::closer::Closer;
use crate::domain::{Inode, ProgramId};

/// What to instrument, plus the per-entity attachment state
pub trait Tracer {
    /// Main-binary functions; offsets are joined from the executable's catalog
    fn binary_probes(&self) -> ProbeMap {
        ProbeMap::new()
    }

    /// Kernel functions, attached by symbol name
    fn kernel_probes(&self) -> ProbeMap {
        ProbeMap::new()
    }

    /// Shared library name to the functions to hook inside it
    fn library_probes(&self) -> LibraryProbes {
        LibraryProbes::new()
    }

    /// Raw socket filter programs, attached in order
    fn socket_filters(&self) -> Vec<ProgramId> {
        Vec::new()
    }

    fn instrumented_libs(&mut self) -> &mut InstrumentedLibs;

    fn closers(&mut self) -> &mut Closers;
}

/// Inodes of shared libraries already hooked for one entity
///
/// Insertion only: a library stays instrumented for the entity's lifetime.
#[derive(Debug, Default)]
pub struct InstrumentedLibs {
    inodes: HashSet<Inode>,
}

impl InstrumentedLibs {
    #[must_use]
    pub fn contains(&self, ino: Inode) -> bool {
        self.inodes.contains(&ino)
    }

    pub fn record(&mut self, ino: Inode) {
        self.inodes.insert(ino);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}

/// Release handles owned by one entity, drained at shutdown
#[derive(Debug, Default)]
pub struct Closers {
    handles: Vec<Closer>,
}

impl Closers {
    pub fn extend(&mut self, handles: impl IntoIterator<Item = Closer>) {
        self.handles.extend(handles);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Closer> {
        self.handles.iter()
    }

    /// Detach everything, most recent first
    ///
    /// Returns the number of handles whose detach reported an error.
    pub fn close_all(&mut self) -> usize {
        let mut failed = 0;
        while let Some(handle) = self.handles.pop() {
            let label = handle.label().to_string();
            if let Err(e) = handle.close() {
                debug!("Error closing {label}: {e}");
                failed += 1;
            }
        }
        failed
    }
}

/// A tracer built from a declarative probe description
#[derive(Debug, Default, Deserialize)]
pub struct ProbeSet {
    #[serde(default)]
    pub binary: ProbeMap,
    #[serde(default)]
    pub kernel: ProbeMap,
    #[serde(default)]
    pub libraries: LibraryProbes,
    #[serde(default)]
    pub socket_filters: Vec<ProgramId>,
    #[serde(skip)]
    libs: InstrumentedLibs,
    #[serde(skip)]
    closers: Closers,
}

impl ProbeSet {
    /// Every program name referenced by this set, without duplicates
    #[must_use]
    pub fn programs(&self) -> Vec<ProgramId> {
        let pairs = self
            .binary
            .values()
            .chain(self.kernel.values())
            .chain(self.libraries.values().flat_map(|m| m.values()));
        let mut programs: Vec<ProgramId> = pairs
            .flat_map(|p| p.entry.iter().chain(p.ret.iter()))
            .chain(self.socket_filters.iter())
            .cloned()
            .collect();
        programs.sort();
        programs.dedup();
        programs
    }
}

impl Tracer for ProbeSet {
    fn binary_probes(&self) -> ProbeMap {
        self.binary.clone()
    }

    fn kernel_probes(&self) -> ProbeMap {
        self.kernel.clone()
    }

    fn library_probes(&self) -> LibraryProbes {
        self.libraries.clone()
    }

    fn socket_filters(&self) -> Vec<ProgramId> {
        self.socket_filters.clone()
    }

    fn instrumented_libs(&mut self) -> &mut InstrumentedLibs {
        &mut self.libs
    }

    fn closers(&mut self) -> &mut Closers {
        &mut self.closers
    }
}
