//! Adapter command and telemetry status.

use nocan::control::{Command, CommandStatus, PowerStatus};
use parking_lot::Mutex;
use std::sync::Arc;

/// Status of commands submitted to an adapter, shared with monitoring code.
#[derive(Debug, Clone, Default)]
pub struct AdapterStatus {
    inner: Arc<Mutex<StatusTable>>,
}

#[derive(Debug, Default)]
struct StatusTable {
    // indexed by command code
    commands: [CommandStatus; Command::ALL.len() + 1],
    power: PowerStatus,
}

impl AdapterStatus {
    pub fn new() -> Self {
        AdapterStatus::default()
    }

    /// Status of the last command of this kind.
    pub fn command_status(&self, command: Command) -> CommandStatus {
        self.inner.lock().commands[command.code() as usize]
    }

    /// Last power telemetry received.
    pub fn power_status(&self) -> PowerStatus {
        self.inner.lock().power
    }

    pub(crate) fn submit(&self, command: Command) {
        self.set(command, CommandStatus::Submitted);
    }

    /// Record a command that never reached the adapter.
    pub(crate) fn fail(&self, command: Command) {
        self.set(command, CommandStatus::Failure);
    }

    fn set(&self, command: Command, status: CommandStatus) {
        self.inner.lock().commands[command.code() as usize] = status;
    }

    /// Record an adapter reply and return the resulting command status.
    ///
    /// A successful power status reply also replaces the telemetry. One
    /// that is short or reports a zero USB reference counts as failed.
    pub(crate) fn apply_reply(
        &self,
        command: Command,
        sys_param: u8,
        data: &[u8],
    ) -> (CommandStatus, Option<PowerStatus>) {
        let mut status = CommandStatus::from_reply(sys_param);
        let mut power = None;

        if command == Command::GetPowerStatus && status == CommandStatus::Success {
            power = <[u8; 8]>::try_from(data)
                .ok()
                .and_then(|data| PowerStatus::from_reply(&data));
            if power.is_none() {
                status = CommandStatus::Failure;
            }
        }

        let mut table = self.inner.lock();
        table.commands[command.code() as usize] = status;
        if let Some(power) = power {
            table.power = power;
        }

        (status, power)
    }
}
