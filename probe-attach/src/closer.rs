//! Release handles for live attachments
//!
//! Every successful attachment yields one [`Closer`]. Closing it (or simply
//! dropping it) detaches the probe or closes the socket, exactly once.

use std::fmt;

use crate::domain::ProbeError;

/// A live attachment that can be torn down
pub trait Detach {
    /// Detach the hook and release its resources
    ///
    /// # Errors
    /// Returns an error if the kernel refuses the detach; the resources are
    /// released regardless.
    fn detach(self: Box<Self>) -> Result<(), ProbeError>;
}

/// Owned release handle for one attached point
pub struct Closer {
    label: String,
    inner: Box<dyn Detach>,
}

impl Closer {
    pub fn new(label: impl Into<String>, inner: impl Detach + 'static) -> Self {
        Self { label: label.into(), inner: Box::new(inner) }
    }

    /// Human-readable description of what this handle keeps attached
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Detach now, consuming the handle
    ///
    /// # Errors
    /// Propagates the detach failure of the underlying link.
    pub fn close(self) -> Result<(), ProbeError> {
        self.inner.detach()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer").field("label", &self.label).finish_non_exhaustive()
    }
}

macro_rules! impl_detach_for_link {
    ($($link:ty),+ $(,)?) => {
        $(
            impl Detach for $link {
                fn detach(self: Box<Self>) -> Result<(), ProbeError> {
                    aya::programs::links::Link::detach(*self).map_err(ProbeError::from)
                }
            }
        )+
    };
}

impl_detach_for_link!(aya::programs::uprobe::UProbeLink, aya::programs::kprobe::KProbeLink);
