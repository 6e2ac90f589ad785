//! NoCAN adapter protocol.
//!
//! Identifier layout, serial frame encoding, message fragmentation and
//! reassembly for nodes attached to a CAN bus behind a USB-serial adapter.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bitset;
pub mod control;
pub mod frame;
pub mod id;
pub mod message;
pub mod node;

use core::time::Duration;

pub use bitset::Bitset64;
pub use frame::Frame;
pub use id::CanId;
pub use message::{Message, Reassembler};
pub use node::NodeIdentifier;

/// Maximum number of nodes addressable on one bus.
pub const MAX_NODES: usize = 128;

/// Maximum payload carried by a single CAN frame.
pub const MAX_DATA_LEN: usize = 8;

/// Delay between two attempts to reopen a lost adapter.
pub const RESCUE_INTERVAL: Duration = Duration::from_secs(10);

/// Node handle.
///
/// Doubles as the 7 bit node address of the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct NodeHandle(u8);

impl NodeHandle {
    /// Raw value used by external layers for "no such node".
    pub const NONE: i8 = -1;

    /// Index of the handle in per-node tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for NodeHandle {
    type Error = ();

    /// Try create a [`NodeHandle`] from a [`u8`] returning an error if the input is higher than `0x7F`.
    fn try_from(value: u8) -> Result<NodeHandle, Self::Error> {
        if value as usize >= MAX_NODES {
            Err(())
        } else {
            Ok(NodeHandle(value))
        }
    }
}

impl TryFrom<usize> for NodeHandle {
    type Error = ();

    fn try_from(value: usize) -> Result<NodeHandle, Self::Error> {
        u8::try_from(value)
            .map_err(|_| ())
            .and_then(NodeHandle::try_from)
    }
}

impl From<NodeHandle> for u8 {
    fn from(value: NodeHandle) -> Self {
        value.0
    }
}

impl From<NodeHandle> for i8 {
    fn from(value: NodeHandle) -> Self {
        value.0 as i8
    }
}

impl From<Option<NodeHandle>> for NodeRaw {
    fn from(value: Option<NodeHandle>) -> Self {
        NodeRaw(value.map_or(NodeHandle::NONE, i8::from))
    }
}

/// Signed node number as exchanged with external layers, `-1` for none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct NodeRaw(pub i8);

impl NodeRaw {
    /// Resolve to a handle, `None` for the sentinel or out of range values.
    pub fn handle(self) -> Option<NodeHandle> {
        u8::try_from(self.0)
            .ok()
            .and_then(|value| NodeHandle::try_from(value).ok())
    }
}

impl core::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_handle() {
        assert!(NodeHandle::try_from(0u8).is_ok());
        assert!(NodeHandle::try_from(64u8).is_ok());
        assert!(NodeHandle::try_from(127u8).is_ok());
        assert!(NodeHandle::try_from(128u8).is_err());
        assert!(NodeHandle::try_from(255u8).is_err());
        assert!(NodeHandle::try_from(1000usize).is_err());
    }

    #[test]
    fn node_raw_sentinel() {
        assert_eq!(NodeRaw::from(None), NodeRaw(-1));
        assert_eq!(NodeRaw(-1).handle(), None);

        let handle = NodeHandle::try_from(5u8).unwrap();
        assert_eq!(NodeRaw::from(Some(handle)), NodeRaw(5));
        assert_eq!(NodeRaw(5).handle(), Some(handle));
    }
}
