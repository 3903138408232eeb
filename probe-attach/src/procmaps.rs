//! Process memory map access
//!
//! Reads `/proc/<pid>/maps` to find which shared libraries a process has
//! mapped, and resolves the `map_files` entry (and its inode) through which a
//! mapping can be opened even when the library's original path is not
//! visible from our mount namespace (containers).

use log::debug;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use crate::domain::{Inode, Pid};

/// One line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub start: u64,
    pub end: u64,
    /// Inode column of the maps file; `None` for anonymous mappings
    pub inode: Option<Inode>,
    /// Backing file path, empty for anonymous mappings
    pub path: String,
}

/// A mapping opened through the process's own view of its address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    pub path: String,
    /// Inode of the backing file, if it could be queried
    pub inode: Option<Inode>,
}

/// Source of process memory maps
pub trait ProcessMaps {
    /// Mappings of `pid` in address order
    ///
    /// Returns an empty list when the process cannot be inspected (it exited,
    /// or we lack permissions); this is not an error.
    fn mappings(&self, pid: Pid) -> Vec<Mapping>;

    /// Path and inode of the file backing `mapping`
    fn mapped_file(&self, pid: Pid, mapping: &Mapping) -> MappedFile;

    /// Path of the process's main executable image
    fn executable(&self, pid: Pid) -> String {
        pid.exe_path()
    }
}

/// [`ProcessMaps`] backed by a procfs mount
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self { root: PathBuf::from("/proc") }
    }
}

impl ProcFs {
    /// Use a procfs mounted somewhere other than `/proc`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pid_dir(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.0.to_string())
    }
}

impl ProcessMaps for ProcFs {
    fn mappings(&self, pid: Pid) -> Vec<Mapping> {
        let maps_path = self.pid_dir(pid).join("maps");
        match fs::read_to_string(&maps_path) {
            Ok(content) => parse_maps(&content),
            Err(e) => {
                debug!("Cannot read {}: {e}", maps_path.display());
                Vec::new()
            }
        }
    }

    fn mapped_file(&self, pid: Pid, mapping: &Mapping) -> MappedFile {
        let range = format!("{:x}-{:x}", mapping.start, mapping.end);
        let path = self.pid_dir(pid).join("map_files").join(range);
        let inode = match fs::metadata(&path) {
            Ok(meta) => Some(Inode(meta.ino())),
            Err(e) => {
                debug!("Cannot stat {}: {e}", path.display());
                None
            }
        };
        MappedFile { path: path.to_string_lossy().into_owned(), inode }
    }

    fn executable(&self, pid: Pid) -> String {
        self.pid_dir(pid).join("exe").to_string_lossy().into_owned()
    }
}

/// Parse the contents of a maps file, skipping malformed lines
#[must_use]
pub fn parse_maps(content: &str) -> Vec<Mapping> {
    content.lines().filter_map(parse_line).collect()
}

/// Parse one maps line: "start-end perms offset dev inode pathname"
fn parse_line(line: &str) -> Option<Mapping> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    // perms, offset, dev
    fields.nth(2)?;
    let inode = fields.next()?.parse::<u64>().ok()?;
    let path = fields.collect::<Vec<_>>().join(" ");

    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        inode: (inode != 0).then_some(Inode(inode)),
        path,
    })
}

/// First file-backed mapping whose path contains `/<library>`
///
/// `library` may be a prefix of the real file name ("libssl.so" matches
/// "/usr/lib/libssl.so.3").
#[must_use]
pub fn find_library<'a>(library: &str, maps: &'a [Mapping]) -> Option<&'a Mapping> {
    let needle = format!("/{library}");
    maps.iter().find(|m| !m.path.is_empty() && m.path.contains(&needle))
}
