//! Structured error types for probe-attach
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! `ProbeError` is what the attachment primitive reports; `AttachError` is
//! what the four attacher entry points return, carrying the name of the
//! function, library or program that failed.

use super::types::ProgramId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("eBPF program {0} not found")]
    ProgramNotFound(ProgramId),

    #[error("{path} is not an instrumentable object file: {reason}")]
    InvalidImage { path: String, reason: String },

    #[error("Unsupported probe location: {0}")]
    InvalidLocation(String),

    #[error("eBPF program {program} is a {found} program, expected {expected}")]
    WrongProbeKind {
        program: ProgramId,
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// First OS error code found in the source chain, if any
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        // `Io` is transparent, its io::Error never shows up as a source
        if let Some(code) = self.as_io().and_then(std::io::Error::raw_os_error) {
            return Some(code);
        }
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            let io_error = err.downcast_ref::<std::io::Error>();
            if let Some(code) = io_error.and_then(std::io::Error::raw_os_error) {
                return Some(code);
            }
            current = err.source();
        }
        None
    }

    fn as_io(&self) -> Option<&std::io::Error> {
        match self {
            ProbeError::Io(e) => Some(e),
            _ => None,
        }
    }

    /// The failure is explained by the target process (or its mapping) having
    /// gone away between map read and attachment.
    #[must_use]
    pub fn is_process_gone(&self) -> bool {
        matches!(self.raw_os_error(), Some(libc::ENOENT | libc::ESRCH))
    }
}

#[derive(Error, Debug)]
pub enum AttachError {
    #[error("instrumenting function {function:?}")]
    Function {
        function: String,
        #[source]
        source: ProbeError,
    },

    #[error("opening {path} to instrument library {library:?}")]
    OpenImage {
        library: String,
        path: String,
        #[source]
        source: ProbeError,
    },

    #[error("attaching socket filter {program}")]
    SocketFilter {
        program: ProgramId,
        #[source]
        source: ProbeError,
    },
}

impl AttachError {
    /// Name of the function, library or program the failure is attributed to
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            AttachError::Function { function, .. } => function,
            AttachError::OpenImage { library, .. } => library,
            AttachError::SocketFilter { program, .. } => program.as_str(),
        }
    }

    #[must_use]
    pub fn probe_error(&self) -> &ProbeError {
        match self {
            AttachError::Function { source, .. }
            | AttachError::OpenImage { source, .. }
            | AttachError::SocketFilter { source, .. } => source,
        }
    }
}
