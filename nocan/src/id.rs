//! CAN identifier layout.

use crate::NodeHandle;
use embedded_can::{ExtendedId, Id};

/// Identifier flags.
///
/// The three upper bits follow the SocketCAN convention and sit outside the
/// 29 bit extended identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Flags(u32);

bitflags::bitflags! {
    impl Flags: u32 {
        const Extended = 1 << 31;
        const Remote = 1 << 30;
        const Error = 1 << 29;
        const First = 1 << 28;
        const Last = 1 << 20;
        const Control = 1 << 18;
    }
}

/// Bits of the 29 bit extended identifier.
pub const IDENTIFIER_MASK: u32 = 0x1FFF_FFFF;

/// Bits a [`Message`](crate::Message) identifier keeps: everything in the
/// identifier except the fragment flags.
pub const MESSAGE_MASK: u32 =
    IDENTIFIER_MASK & !(Flags::First.bits() | Flags::Last.bits());

bitfield::bitfield! {
    /// Packed CAN identifier word.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
    pub struct CanId(u32);
    impl Debug;
    pub extended, set_extended: 31;
    pub remote, set_remote: 30;
    pub error, set_error: 29;
    pub first, set_first: 28;
    pub u8, node, set_node: 27, 21;
    pub last, set_last: 20;
    pub control, set_control: 18;
    pub u8, sys_func, set_sys_func: 15, 8;
    pub u8, sys_param, set_sys_param: 7, 0;
    pub u16, channel, set_channel: 15, 0;
}

impl CanId {
    /// Wrap a full identifier word, flag bits included.
    pub const fn from_raw(raw: u32) -> Self {
        CanId(raw)
    }

    /// Build an extended identifier from its 29 bit value.
    ///
    /// Returns `None` if the value is wider than 29 bits.
    pub fn from_identifier(identifier: u32) -> Option<Self> {
        if identifier > IDENTIFIER_MASK {
            return None;
        }

        Some(CanId(identifier | Flags::Extended.bits()))
    }

    /// Identifier of a control frame addressed to the adapter.
    pub fn new_control(sys_func: u8, sys_param: u8) -> Self {
        let mut id = CanId(Flags::Control.bits());
        id.set_sys_func(sys_func);
        id.set_sys_param(sys_param);
        id
    }

    /// Identifier of a data frame for `node` on `channel`.
    pub fn new_message(node: NodeHandle, channel: u16) -> Self {
        let mut id = CanId(Flags::Extended.bits());
        id.set_node(node.into());
        id.set_channel(channel);
        id
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// The 29 bit identifier without the upper flag bits.
    pub const fn identifier(&self) -> u32 {
        self.0 & IDENTIFIER_MASK
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.0)
    }

    /// Node handle carried in the address field.
    pub fn node_handle(&self) -> NodeHandle {
        // the 7 bit field always fits
        NodeHandle(self.node())
    }

    /// Identifier as carried by a [`Message`](crate::Message).
    pub const fn message_id(&self) -> CanId {
        CanId(self.0 & MESSAGE_MASK)
    }

    pub fn with_flags(mut self, flags: Flags) -> CanId {
        self.0 |= flags.bits();
        self
    }
}

impl From<CanId> for Id {
    fn from(value: CanId) -> Self {
        // masked to 29 bits, always valid
        match ExtendedId::new(value.identifier()) {
            Some(id) => Id::Extended(id),
            None => unreachable!(),
        }
    }
}

impl From<ExtendedId> for CanId {
    fn from(value: ExtendedId) -> Self {
        CanId(value.as_raw() | Flags::Extended.bits())
    }
}
