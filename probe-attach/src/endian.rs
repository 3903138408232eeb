//! Host to network byte order conversion for 16-bit values

/// Byte order of the machine a value was produced on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host this binary was compiled for
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Convert `value` from `host` byte order to network (big-endian) order
#[must_use]
pub const fn to_network_order(value: u16, host: ByteOrder) -> u16 {
    match host {
        ByteOrder::Little => value.swap_bytes(),
        ByteOrder::Big => value,
    }
}

/// `htons(3)`: host to network short
#[must_use]
pub const fn htons(value: u16) -> u16 {
    to_network_order(value, ByteOrder::host())
}
