//! Channels between a link task and the message router.

use nocan::Message;
use std::sync::mpsc::{self, Receiver, SendError, Sender};

/// Out of band signal sent to a link task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Periodic tick, the link polls adapter telemetry.
    Heartbeat,
    /// Any other signal, ignored by links.
    Other(u32),
}

/// Item delivered to a link task for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message(Message),
    Signal(Signal),
}

impl From<Message> for Delivery {
    fn from(value: Message) -> Self {
        Delivery::Message(value)
    }
}

impl From<Signal> for Delivery {
    fn from(value: Signal) -> Self {
        Delivery::Signal(value)
    }
}

/// Link side of a port.
///
/// `input` carries messages and signals to transmit, `output` carries the
/// messages reassembled from the bus.
#[derive(Debug)]
pub struct Port {
    pub input: Receiver<Delivery>,
    pub output: Sender<Message>,
}

impl Port {
    pub fn send_message(&self, message: Message) -> Result<(), SendError<Message>> {
        self.output.send(message)
    }
}

/// Router side of a port.
#[derive(Debug)]
pub struct PortHandle {
    pub sender: Sender<Delivery>,
    pub receiver: Receiver<Message>,
}

impl PortHandle {
    pub fn send_message(&self, message: Message) -> Result<(), SendError<Delivery>> {
        self.sender.send(Delivery::Message(message))
    }

    pub fn send_signal(&self, signal: Signal) -> Result<(), SendError<Delivery>> {
        self.sender.send(Delivery::Signal(signal))
    }
}

/// Create a connected port pair.
pub fn port() -> (Port, PortHandle) {
    let (input_tx, input_rx) = mpsc::channel();
    let (output_tx, output_rx) = mpsc::channel();

    (
        Port {
            input: input_rx,
            output: output_tx,
        },
        PortHandle {
            sender: input_tx,
            receiver: output_rx,
        },
    )
}
