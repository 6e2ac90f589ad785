use crate::id::{CanId, Flags};
use crate::MAX_DATA_LEN;
use core::fmt;
use embedded_can::Id;

/// Serial frame length, start byte included.
pub const FRAME_LEN: usize = 14;

/// Marks the beginning of a frame on the serial stream.
pub const FRAME_START: u8 = 0xCA;

/// Offset of the data bytes within a frame.
const DATA_OFFSET: usize = 6;

bitfield::bitfield! {
    /// CAN frame as exchanged with the serial adapter.
    ///
    /// A start byte, the identifier word with its flag bits, the data length
    /// and eight data bytes, zero padded.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
    pub struct FrameBitfield(MSB0 [u8]);
    impl Debug;
    pub u8, start, set_start: 7, 0;
    pub u32, raw_id, set_raw_id: 39, 8;
    pub u8, dlc, set_dlc: 47, 40;
    pub u64, raw_data, set_raw_data: 111, 48;
}

pub type Frame = FrameBitfield<[u8; FRAME_LEN]>;

/// Error decoding a serial frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FrameError {
    /// First byte is not [`FRAME_START`].
    MissingStart(u8),
    /// Data length code above 8.
    InvalidLength(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::MissingStart(byte) => {
                write!(f, "expected frame start, got 0x{:02x}", byte)
            }
            FrameError::InvalidLength(dlc) => {
                write!(f, "invalid data length {}", dlc)
            }
        }
    }
}

impl Frame {
    pub fn new() -> Self {
        let mut frame = FrameBitfield([0; FRAME_LEN]);
        frame.set_start(FRAME_START);
        frame
    }

    /// Build a frame from an identifier and up to 8 data bytes.
    pub fn from_parts(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }

        let mut frame = Frame::new();
        frame.set_raw_id(id.raw());
        frame.with_payload(data)
    }

    /// Replace the data bytes, `None` if `data` is longer than 8 bytes.
    pub fn with_payload(mut self, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }

        self.0[DATA_OFFSET..].fill(0);
        self.0[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
        self.set_dlc(data.len() as u8);

        Some(self)
    }

    /// Check a received frame.
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Result<Self, FrameError> {
        let frame = FrameBitfield(bytes);

        if frame.start() != FRAME_START {
            return Err(FrameError::MissingStart(frame.start()));
        }
        if frame.dlc() as usize > MAX_DATA_LEN {
            return Err(FrameError::InvalidLength(frame.dlc()));
        }

        Ok(frame)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn can_id(&self) -> CanId {
        CanId::from_raw(self.raw_id())
    }

    /// Data bytes up to the data length.
    pub fn payload(&self) -> &[u8] {
        let len = (self.dlc() as usize).min(MAX_DATA_LEN);
        &self.0[DATA_OFFSET..DATA_OFFSET + len]
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let id = match id.into() {
            Id::Standard(id) => CanId::from_raw(id.as_raw() as u32),
            Id::Extended(id) => CanId::from(id),
        };

        Frame::from_parts(id, data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }

        let id = match id.into() {
            Id::Standard(id) => CanId::from_raw(id.as_raw() as u32),
            Id::Extended(id) => CanId::from(id),
        };

        let mut frame = Frame::new();
        frame.set_raw_id(id.with_flags(Flags::Remote).raw());
        frame.set_dlc(dlc as u8);

        Some(frame)
    }

    fn is_extended(&self) -> bool {
        self.can_id().extended()
    }

    fn is_remote_frame(&self) -> bool {
        self.can_id().remote()
    }

    fn id(&self) -> Id {
        let id = self.can_id();
        if id.extended() {
            id.into()
        } else {
            match embedded_can::StandardId::new((id.identifier() & 0x7FF) as u16) {
                Some(id) => Id::Standard(id),
                None => unreachable!(),
            }
        }
    }

    fn dlc(&self) -> usize {
        FrameBitfield::dlc(self) as usize
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}
