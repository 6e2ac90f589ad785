//! Serial link task.
//!
//! A task owns one adapter. Its read loop turns frames into messages and
//! handles adapter replies, its write loop turns messages into frames. When a
//! read fails the read loop closes the device and reopens it at a fixed
//! interval until it comes back.

use crate::device::{FrameReader, FrameWriter, Opener};
use crate::port::{Delivery, Port, Signal};
use crate::status::AdapterStatus;
use crate::LinkError;
use nocan::control::{command_frame, Command, CommandStatus};
use nocan::message::{Reassembly, Violation};
use nocan::{Frame, Message, Reassembler, RESCUE_INTERVAL};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
    Rescuing,
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Task settings.
#[derive(Clone)]
pub struct TaskOptions {
    /// Delay between two reopen attempts while rescuing.
    pub rescue_interval: Duration,
    sleeper: Sleeper,
}

impl TaskOptions {
    /// Replace the function used to wait between reopen attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            rescue_interval: RESCUE_INTERVAL,
            sleeper: Arc::new(thread::sleep),
        }
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("rescue_interval", &self.rescue_interval)
            .finish_non_exhaustive()
    }
}

struct Shared {
    opener: Box<dyn Opener>,
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
    state: Mutex<LinkState>,
    status: AdapterStatus,
    shutdown: AtomicBool,
    options: TaskOptions,
}

/// Handle to a running link, for sending and monitoring.
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("device", &self.device())
            .field("state", &self.state())
            .finish()
    }
}

impl LinkHandle {
    pub fn device(&self) -> &str {
        self.shared.opener.name()
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    /// Command and telemetry status of the adapter.
    pub fn status(&self) -> &AdapterStatus {
        &self.shared.status
    }

    /// Fragment `message` and send its frames in order.
    ///
    /// Stops at the first failed write; the remaining frames are not sent.
    pub fn send_message(&self, message: &Message) -> Result<(), LinkError> {
        let mut writer = self.shared.writer.lock();
        let writer = writer.as_mut().ok_or(LinkError::Closed)?;

        for frame in message.fragments() {
            writer.send(&frame)?;
        }

        debug!(
            device = self.device(),
            node = %message.node(),
            len = message.data.len(),
            "Sent message"
        );
        Ok(())
    }

    pub fn send_reset(&self) -> Result<(), LinkError> {
        self.send_command(Command::Reset, 0)
    }

    pub fn send_get_power_status(&self) -> Result<(), LinkError> {
        self.send_command(Command::GetPowerStatus, 0)
    }

    /// Switch bus power on or off.
    pub fn send_set_power(&self, on: bool) -> Result<(), LinkError> {
        self.send_command(Command::SetPower, on as u8)
    }

    /// Enable or disable the bus termination resistor.
    pub fn send_resistor_configure(&self, on: bool) -> Result<(), LinkError> {
        self.send_command(Command::ResistorConfigure, on as u8)
    }

    /// Ask both loops to stop at their next opportunity.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    /// Send a command frame; a command that could not be sent is marked
    /// failed rather than left submitted.
    fn send_command(&self, command: Command, sys_param: u8) -> Result<(), LinkError> {
        let frame = command_frame(command, sys_param);

        let mut writer = self.shared.writer.lock();
        let result = match writer.as_mut() {
            Some(writer) => {
                self.shared.status.submit(command);
                writer.send(&frame)
            }
            None => Err(LinkError::Closed),
        };

        if result.is_err() {
            self.shared.status.fail(command);
        }
        result
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn set_state(&self, state: LinkState) {
        *self.shared.state.lock() = state;
    }

    fn read_loop(&self, mut reader: Box<dyn FrameReader>, output: Sender<Message>) {
        let mut reassembler = Reassembler::new();

        while !self.is_shutdown() {
            let frame = match reader.recv() {
                Ok(frame) => frame,
                Err(LinkError::Timeout) => continue,
                Err(err) => {
                    error!(device = self.device(), error = %err, "Failed to receive frame");
                    match self.rescue(reader) {
                        Some(new_reader) => {
                            reader = new_reader;
                            // fragments in flight were lost with the link
                            reassembler.clear();
                            continue;
                        }
                        None => return,
                    }
                }
            };

            match reassembler.push(&frame) {
                Reassembly::Pending(_) => {}
                Reassembly::Complete(message) => {
                    if output.send(message).is_err() {
                        info!(device = self.device(), "Message router is gone, stopping");
                        break;
                    }
                }
                Reassembly::Control(frame) => self.handle_reply(&frame),
                Reassembly::Dropped(violation) => self.log_violation(violation),
            }
        }

        self.close();
    }

    /// Close the device and reopen it until an attempt succeeds.
    ///
    /// Returns `None` only when the task is shut down meanwhile.
    fn rescue(&self, reader: Box<dyn FrameReader>) -> Option<Box<dyn FrameReader>> {
        self.set_state(LinkState::Rescuing);
        drop(reader);
        self.shared.writer.lock().take();

        loop {
            if self.is_shutdown() {
                self.set_state(LinkState::Closed);
                return None;
            }

            match self.shared.opener.open() {
                Ok((reader, writer)) => {
                    *self.shared.writer.lock() = Some(writer);
                    self.set_state(LinkState::Open);
                    info!(device = self.device(), "Reopened device");

                    if let Err(err) = self.send_reset() {
                        warn!(device = self.device(), error = %err, "Failed to reset adapter");
                    }
                    return Some(reader);
                }
                Err(err) => {
                    warn!(device = self.device(), error = %err, "Failed to reopen device");
                }
            }

            (self.shared.options.sleeper)(self.shared.options.rescue_interval);
        }
    }

    fn handle_reply(&self, frame: &Frame) {
        let id = frame.can_id();

        let command = match Command::try_from(id.sys_func()) {
            Ok(command) => command,
            Err(code) => {
                warn!(device = self.device(), code, "Got reply to unknown adapter command");
                return;
            }
        };

        let (status, power) = self
            .shared
            .status
            .apply_reply(command, id.sys_param(), frame.payload());

        if let Some(power) = power {
            info!(
                device = self.device(),
                power_on = power.power_on,
                power_level = power.power_level,
                sense_on = power.sense_on,
                sense_level = power.sense_level,
                usb_power = power.usb_reference,
                "Power status estimates"
            );
        }

        match status {
            CommandStatus::Failure => {
                warn!(device = self.device(), ?command, param = id.sys_param(), "Adapter command failed")
            }
            _ => debug!(device = self.device(), ?command, "Adapter command succeeded"),
        }
    }

    fn log_violation(&self, violation: Violation) {
        match violation {
            Violation::Malformed => {
                warn!(device = self.device(), "Got malformed frame, discarding")
            }
            Violation::ErrorFrame => {
                error!(device = self.device(), "Received error frame on CAN controller")
            }
            Violation::UnexpectedFirst(node) => warn!(
                device = self.device(),
                %node,
                "Got frame with inconsistent first bit indicator, discarding"
            ),
            Violation::MissingFirst(node) => warn!(
                device = self.device(),
                %node,
                "Got frame with missing first bit indicator, discarding"
            ),
        }
    }

    fn write_loop(&self, input: Receiver<Delivery>) {
        for delivery in input.iter() {
            match delivery {
                Delivery::Message(message) => {
                    if let Err(err) = self.send_message(&message) {
                        error!(device = self.device(), error = %err, "Failed to send message");
                    }
                }
                Delivery::Signal(Signal::Heartbeat) => {
                    if let Err(err) = self.send_get_power_status() {
                        warn!(device = self.device(), error = %err, "Failed to query power status");
                    }
                }
                // other signals are not for links
                Delivery::Signal(Signal::Other(_)) => {}
            }

            if self.is_shutdown() {
                break;
            }
        }
    }

    fn close(&self) {
        self.shared.writer.lock().take();
        self.set_state(LinkState::Closed);
        debug!(device = self.device(), "Closed device");
    }
}

/// An opened adapter link, ready to run.
pub struct SerialTask {
    handle: LinkHandle,
    reader: Box<dyn FrameReader>,
}

impl fmt::Debug for SerialTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTask").field("handle", &self.handle).finish()
    }
}

impl SerialTask {
    /// Open the device.
    ///
    /// A failure here is final, the task is not retried.
    pub fn open(opener: impl Opener + 'static, options: TaskOptions) -> Result<Self, LinkError> {
        let (reader, writer) = opener.open().map_err(|err| {
            error!(device = opener.name(), error = %err, "Could not open device");
            err
        })?;

        let shared = Arc::new(Shared {
            opener: Box::new(opener),
            writer: Mutex::new(Some(writer)),
            state: Mutex::new(LinkState::Open),
            status: AdapterStatus::new(),
            shutdown: AtomicBool::new(false),
            options,
        });

        Ok(SerialTask {
            handle: LinkHandle { shared },
            reader,
        })
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Reset the adapter, query its power status and start both loops.
    pub fn spawn(self, port: Port) -> std::io::Result<TaskThreads> {
        let SerialTask { handle, reader } = self;
        let Port { input, output } = port;

        if let Err(err) = handle.send_reset() {
            warn!(device = handle.device(), error = %err, "Failed to reset adapter");
        }
        if let Err(err) = handle.send_get_power_status() {
            warn!(device = handle.device(), error = %err, "Failed to query power status");
        }

        let writer = {
            let handle = handle.clone();
            thread::Builder::new()
                .name(format!("nocan-write {}", handle.device()))
                .spawn(move || handle.write_loop(input))?
        };

        let reader = {
            let handle = handle.clone();
            thread::Builder::new()
                .name(format!("nocan-read {}", handle.device()))
                .spawn(move || handle.read_loop(reader, output))?
        };

        info!(device = handle.device(), "Link task started");

        Ok(TaskThreads { reader, writer })
    }
}

/// Threads of a running task.
#[derive(Debug)]
pub struct TaskThreads {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TaskThreads {
    /// Wait for both loops to finish.
    ///
    /// The read loop ends on shutdown or when the router drops its receiver;
    /// the write loop when the router drops its sender.
    pub fn join(self) -> thread::Result<()> {
        self.reader.join()?;
        self.writer.join()
    }
}
