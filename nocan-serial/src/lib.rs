//! Serial driver for NoCAN adapters.
//!
//! This crate runs the link between the host and a USB-serial CAN adapter:
//! frames are read and written on the serial device, reassembled into
//! messages, and the device is reopened when it is lost.

pub mod device;
mod error;
pub mod port;
pub mod status;
pub mod task;

// re-export
pub use nocan as proto;

pub use device::{FrameReader, FrameWriter, Opener, SerialOpener};
pub use error::LinkError;
pub use port::{port, Delivery, Port, PortHandle, Signal};
pub use status::AdapterStatus;
pub use task::{LinkHandle, LinkState, SerialTask, TaskOptions, TaskThreads};
