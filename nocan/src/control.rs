//! Adapter control commands and replies.

use crate::{CanId, Frame, MAX_DATA_LEN};

/// Control command understood by the serial adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Reset = 1,
    GetRegisters = 2,
    SetPower = 3,
    GetPowerStatus = 4,
    ResistorConfigure = 5,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Reset,
        Command::GetRegisters,
        Command::SetPower,
        Command::GetPowerStatus,
        Command::ResistorConfigure,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.code() == value)
            .ok_or(value)
    }
}

/// Progress of the last submitted command of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandStatus {
    #[default]
    Unknown = 0,
    Submitted = 1,
    Success = 2,
    Failure = 3,
}

impl CommandStatus {
    /// Status reported by a reply's system parameter byte.
    pub const fn from_reply(sys_param: u8) -> Self {
        if sys_param == 0 {
            CommandStatus::Success
        } else {
            CommandStatus::Failure
        }
    }
}

/// Build a control frame for the adapter.
///
/// Returns `None` if `data` is longer than 8 bytes.
pub fn control_frame(command: Command, sys_param: u8, data: &[u8]) -> Option<Frame> {
    command_frame(command, sys_param).with_payload(data)
}

/// Build a control frame without payload.
pub fn command_frame(command: Command, sys_param: u8) -> Frame {
    let mut frame = Frame::new();
    frame.set_raw_id(CanId::new_control(command.code(), sys_param).raw());
    frame
}

/// Bus power telemetry reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct PowerStatus {
    pub power_on: bool,
    /// Bus power level in volts.
    pub power_level: f32,
    pub sense_on: bool,
    /// Sense level in percent.
    pub sense_level: f32,
    /// USB reference voltage in volts.
    pub usb_reference: f32,
}

impl PowerStatus {
    /// Decode the eight data bytes of a power status reply.
    ///
    /// Returns `None` if the USB reference reading is zero, the levels are
    /// scaled by it.
    pub fn from_reply(data: &[u8; MAX_DATA_LEN]) -> Option<Self> {
        let power = u16::from_be_bytes([data[1], data[2]]) as f32;
        let sense = u16::from_be_bytes([data[4], data[5]]) as f32;
        let usbref = u16::from_be_bytes([data[6], data[7]]);
        if usbref == 0 {
            return None;
        }
        let usbref = usbref as f32;

        Some(PowerStatus {
            power_on: data[0] != 0,
            power_level: power / usbref * 1.1 * 9.2,
            sense_on: data[3] != 0,
            sense_level: 100.0 * sense / 1023.0,
            usb_reference: 1023.0 * 1.1 / usbref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes() {
        assert_eq!(Command::try_from(1), Ok(Command::Reset));
        assert_eq!(Command::try_from(4), Ok(Command::GetPowerStatus));
        assert_eq!(Command::try_from(5), Ok(Command::ResistorConfigure));
        assert_eq!(Command::try_from(0), Err(0));
        assert_eq!(Command::try_from(6), Err(6));
    }

    #[test]
    fn status_values_are_distinct() {
        assert_ne!(CommandStatus::Success as u8, CommandStatus::Failure as u8);
        assert_eq!(CommandStatus::from_reply(0), CommandStatus::Success);
        assert_eq!(CommandStatus::from_reply(1), CommandStatus::Failure);
    }

    #[test]
    fn reset_frame() {
        let frame = control_frame(Command::Reset, 0, &[]).unwrap();
        let id = frame.can_id();

        assert!(id.control());
        assert_eq!(id.sys_func(), 1);
        assert_eq!(id.sys_param(), 0);
        assert!(frame.payload().is_empty());
        assert!(control_frame(Command::Reset, 0, &[0; 9]).is_none());
        assert_eq!(command_frame(Command::Reset, 0), frame);
    }

    #[test]
    fn control_frame_payload() {
        let frame = control_frame(Command::SetPower, 1, &[7, 8, 9]).unwrap();

        assert_eq!(frame.can_id(), command_frame(Command::SetPower, 1).can_id());
        assert_eq!(frame.payload(), &[7, 8, 9]);
        assert_eq!(frame.as_bytes()[9..], [0; 5]);
        assert_eq!(control_frame(Command::SetPower, 1, &[0; 8]).unwrap().payload(), &[0; 8]);
    }

    #[test]
    fn power_status_decoding() {
        // power 0x0200, sense 0x03FF, usbref 0x0100
        let status = PowerStatus::from_reply(&[1, 0x02, 0x00, 0, 0x03, 0xFF, 0x01, 0x00]).unwrap();

        assert!(status.power_on);
        assert!(!status.sense_on);
        assert!((status.power_level - 2.0 * 1.1 * 9.2).abs() < 1e-4);
        assert!((status.sense_level - 100.0).abs() < 1e-4);
        assert!((status.usb_reference - 1023.0 * 1.1 / 256.0).abs() < 1e-4);
    }

    #[test]
    fn zero_usb_reference_is_rejected() {
        assert_eq!(PowerStatus::from_reply(&[1, 0x02, 0x00, 1, 0x03, 0xFF, 0x00, 0x00]), None);
    }
}
