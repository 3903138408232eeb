//! Raw packet sockets for socket filter programs

#![allow(unsafe_code)] // socket(2) has no safe std wrapper for AF_PACKET

use std::io;
use std::os::fd::{FromRawFd, OwnedFd};

use crate::endian::htons;

/// `ETH_P_ALL` in network byte order: receive every protocol
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub const ALL_PROTOCOLS: u16 = htons(libc::ETH_P_ALL as u16);

/// Open an `AF_PACKET` raw socket bound to all protocols
///
/// # Errors
/// Returns the OS error, typically `EPERM` without `CAP_NET_RAW`.
pub fn open_packet_socket() -> io::Result<OwnedFd> {
    // SAFETY: socket(2) takes no pointers; the result is checked before use.
    let fd = unsafe {
        libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, i32::from(ALL_PROTOCOLS))
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
