//! The attachment primitive
//!
//! [`Backend`] is the seam between the attacher's policy (what to hook,
//! which failures matter) and the platform call that actually creates a
//! hook. [`AyaBackend`] implements it on top of a loaded [`aya::Ebpf`].

use aya::{
    programs::{
        links::Link, socket_filter::SocketFilterLink, KProbe, ProbeKind as HookKind,
        SocketFilter, UProbe,
    },
    Ebpf,
};
use object::FileKind;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::OwnedFd;

use crate::closer::{Closer, Detach};
use crate::domain::{ProbeError, ProgramId};
use crate::socket::open_packet_socket;

const ELF_IDENT_LEN: usize = 16;

/// An executable or shared library that user probes can be placed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    path: String,
}

impl Image {
    /// Open `path` and check it starts with an ELF header
    ///
    /// Only the identification bytes are read, the rest of the file is left
    /// to the kernel.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not an ELF object.
    pub fn open(path: impl Into<String>) -> Result<Self, ProbeError> {
        let path = path.into();
        let mut ident = Vec::with_capacity(ELF_IDENT_LEN);
        File::open(&path)?.take(ELF_IDENT_LEN as u64).read_to_end(&mut ident)?;
        match FileKind::parse(&*ident) {
            Ok(FileKind::Elf32 | FileKind::Elf64) => Ok(Self { path }),
            Ok(kind) => {
                Err(ProbeError::InvalidImage { path, reason: format!("unsupported {kind:?} file") })
            }
            Err(e) => Err(ProbeError::InvalidImage { path, reason: e.to_string() }),
        }
    }

    /// Refer to `path` without validating it
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Where a probe is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// Kernel function, resolved by symbol name
    Kernel,
    /// User-space image, resolved by symbol name or byte offset
    Image(&'a Image),
}

/// Address of the probe within its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    Symbol(&'a str),
    Offset(u64),
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Symbol(symbol) => f.write_str(symbol),
            Location::Offset(offset) => write!(f, "0x{offset:x}"),
        }
    }
}

/// Whether the program runs when the location is entered or returned from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Entry,
    Return,
}

/// Platform primitive creating live hooks
pub trait Backend {
    /// Open an image for instrumentation
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or is not an object file.
    fn open_image(&mut self, path: &str) -> Result<Image, ProbeError> {
        Image::open(path)
    }

    /// Hook `program` at `location` inside `target`
    ///
    /// # Errors
    /// Returns the platform error if the hook cannot be created.
    fn attach_probe(
        &mut self,
        target: Target<'_>,
        kind: ProbeKind,
        location: Location<'_>,
        program: &ProgramId,
    ) -> Result<Closer, ProbeError>;

    /// Open the raw packet socket a filter will be attached to
    ///
    /// # Errors
    /// Returns the OS error of `socket(2)`.
    fn open_packet_socket(&mut self) -> Result<OwnedFd, ProbeError> {
        Ok(open_packet_socket()?)
    }

    /// Attach `program` as a filter on `socket`, taking ownership of it
    ///
    /// # Errors
    /// Returns the platform error if `SO_ATTACH_BPF` fails.
    fn attach_socket_filter(
        &mut self,
        program: &ProgramId,
        socket: OwnedFd,
    ) -> Result<Closer, ProbeError>;
}

/// Backend attaching programs of a loaded eBPF object with aya
///
/// Programs are loaded into the kernel lazily, the first time they are
/// attached. Whether a probe fires on entry or on return is decided by the
/// program's own section (`kprobe` vs `kretprobe`, `uprobe` vs `uretprobe`);
/// a program whose section does not match the requested [`ProbeKind`] is
/// rejected (see [`required_hook`]).
pub struct AyaBackend<'a> {
    bpf: &'a mut Ebpf,
    pid: Option<i32>,
}

impl<'a> AyaBackend<'a> {
    pub fn new(bpf: &'a mut Ebpf) -> Self {
        Self { bpf, pid: None }
    }

    /// Only fire user probes in this process instead of every process
    /// mapping the image
    #[must_use]
    pub fn with_pid_filter(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    fn uprobe(&mut self, id: &ProgramId) -> Result<&mut UProbe, ProbeError> {
        let program: &mut UProbe = self
            .bpf
            .program_mut(id.as_str())
            .ok_or_else(|| ProbeError::ProgramNotFound(id.clone()))?
            .try_into()?;
        if program.fd().is_err() {
            program.load()?;
        }
        Ok(program)
    }

    fn kprobe(&mut self, id: &ProgramId) -> Result<&mut KProbe, ProbeError> {
        let program: &mut KProbe = self
            .bpf
            .program_mut(id.as_str())
            .ok_or_else(|| ProbeError::ProgramNotFound(id.clone()))?
            .try_into()?;
        if program.fd().is_err() {
            program.load()?;
        }
        Ok(program)
    }

    fn socket_filter(&mut self, id: &ProgramId) -> Result<&mut SocketFilter, ProbeError> {
        let program: &mut SocketFilter = self
            .bpf
            .program_mut(id.as_str())
            .ok_or_else(|| ProbeError::ProgramNotFound(id.clone()))?
            .try_into()?;
        if program.fd().is_err() {
            program.load()?;
        }
        Ok(program)
    }
}

/// Program section a hook needs
///
/// Return probes at a byte offset are plain uprobes placed on a return
/// instruction; a uretprobe there would fire mid-function.
#[must_use]
pub fn required_hook(target: Target<'_>, kind: ProbeKind, location: Location<'_>) -> HookKind {
    match (target, kind, location) {
        (Target::Kernel, ProbeKind::Entry, _) => HookKind::KProbe,
        (Target::Kernel, ProbeKind::Return, _) => HookKind::KRetProbe,
        (Target::Image(_), ProbeKind::Return, Location::Symbol(_)) => HookKind::URetProbe,
        (Target::Image(_), _, _) => HookKind::UProbe,
    }
}

fn hook_name(kind: HookKind) -> &'static str {
    match kind {
        HookKind::KProbe => "kprobe",
        HookKind::KRetProbe => "kretprobe",
        HookKind::UProbe => "uprobe",
        HookKind::URetProbe => "uretprobe",
    }
}

fn check_hook(program: &ProgramId, expected: HookKind, found: HookKind) -> Result<(), ProbeError> {
    let (expected, found) = (hook_name(expected), hook_name(found));
    if expected == found {
        return Ok(());
    }
    Err(ProbeError::WrongProbeKind { program: program.clone(), expected, found })
}

impl Backend for AyaBackend<'_> {
    fn attach_probe(
        &mut self,
        target: Target<'_>,
        kind: ProbeKind,
        location: Location<'_>,
        program: &ProgramId,
    ) -> Result<Closer, ProbeError> {
        let expected = required_hook(target, kind, location);
        let hook = hook_name(expected);

        match target {
            Target::Kernel => {
                let Location::Symbol(symbol) = location else {
                    return Err(ProbeError::InvalidLocation(format!(
                        "kernel probes are addressed by symbol, got offset {location}"
                    )));
                };
                let kprobe = self.kprobe(program)?;
                check_hook(program, expected, kprobe.kind())?;
                let link_id = kprobe.attach(symbol, 0)?;
                let link = kprobe.take_link(link_id)?;
                Ok(Closer::new(format!("{hook} {symbol} ({program})"), link))
            }
            Target::Image(image) => {
                let (fn_name, offset) = match location {
                    Location::Symbol(symbol) => (Some(symbol), 0),
                    Location::Offset(offset) => (None, offset),
                };
                let pid = self.pid;
                let uprobe = self.uprobe(program)?;
                check_hook(program, expected, uprobe.kind())?;
                let link_id = uprobe.attach(fn_name, offset, image.path(), pid)?;
                let link = uprobe.take_link(link_id)?;
                Ok(Closer::new(format!("{hook} {}:{location} ({program})", image.path()), link))
            }
        }
    }

    fn attach_socket_filter(
        &mut self,
        program: &ProgramId,
        socket: OwnedFd,
    ) -> Result<Closer, ProbeError> {
        let filter = self.socket_filter(program)?;
        let link_id = filter.attach(&socket)?;
        let link = filter.take_link(link_id)?;
        Ok(Closer::new(format!("socket filter ({program})"), AttachedSocket { link, socket }))
    }
}

/// A packet socket with a filter attached; closing the socket releases both
struct AttachedSocket {
    link: SocketFilterLink,
    socket: OwnedFd,
}

impl Detach for AttachedSocket {
    fn detach(self: Box<Self>) -> Result<(), ProbeError> {
        let AttachedSocket { link, socket } = *self;
        let detached = link.detach();
        drop(socket);
        detached.map_err(ProbeError::from)
    }
}
