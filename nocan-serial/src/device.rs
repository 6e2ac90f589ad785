//! Adapter device access.

use crate::LinkError;
use nocan::frame::{FRAME_LEN, FRAME_START};
use nocan::Frame;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

/// Default adapter baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read timeout, after which [`LinkError::Timeout`] is reported.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Receiving half of an adapter connection.
pub trait FrameReader: Send {
    /// Block until the next frame arrives or the read times out.
    fn recv(&mut self) -> Result<Frame, LinkError>;
}

/// Sending half of an adapter connection.
pub trait FrameWriter: Send {
    fn send(&mut self, frame: &Frame) -> Result<(), LinkError>;
}

/// Opens connections to one adapter.
///
/// Every call opens a fresh connection to the same device; used both at
/// startup and when rescuing a lost link.
pub trait Opener: Send + Sync {
    /// Device name used in logs.
    fn name(&self) -> &str;

    fn open(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>), LinkError>;
}

/// Serial device settings.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialOpener {
    pub fn new(path: impl Into<String>) -> Self {
        SerialOpener {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Opener for SerialOpener {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&self) -> Result<(Box<dyn FrameReader>, Box<dyn FrameWriter>), LinkError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|source| LinkError::Open {
                device: self.path.clone(),
                source,
            })?;
        let writer = port.try_clone()?;

        debug!(device = %self.path, baud_rate = self.baud_rate, "Opened device");

        Ok((
            Box::new(FrameStream::new(port)),
            Box::new(FrameSink::new(writer)),
        ))
    }
}

/// Splits a byte stream into frames.
///
/// Bytes before a start marker are skipped, as is a start marker followed by
/// an invalid frame, so the stream resynchronises after line noise.
#[derive(Debug)]
pub struct FrameStream<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> FrameStream<R> {
    pub fn new(inner: R) -> Self {
        FrameStream {
            inner,
            buf: Vec::with_capacity(4 * FRAME_LEN),
        }
    }

    /// Take a frame out of the buffer if a complete one is available.
    fn take_frame(&mut self) -> Option<Frame> {
        loop {
            match self.buf.iter().position(|&byte| byte == FRAME_START) {
                Some(0) => {}
                Some(pos) => {
                    warn!(skipped = pos, "Discarding bytes before frame start");
                    self.buf.drain(..pos);
                }
                None => {
                    if !self.buf.is_empty() {
                        warn!(skipped = self.buf.len(), "Discarding bytes before frame start");
                    }
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < FRAME_LEN {
                return None;
            }

            let mut bytes = [0u8; FRAME_LEN];
            bytes.copy_from_slice(&self.buf[..FRAME_LEN]);

            match Frame::from_bytes(bytes) {
                Ok(frame) => {
                    self.buf.drain(..FRAME_LEN);
                    return Some(frame);
                }
                Err(err) => {
                    warn!(error = %err, "Got malformed serial frame, resynchronising");
                    // drop the start byte and rescan
                    self.buf.drain(..1);
                }
            }
        }
    }
}

impl<R: Read + Send> FrameReader for FrameStream<R> {
    fn recv(&mut self) -> Result<Frame, LinkError> {
        let mut chunk = [0u8; 64];

        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(frame);
            }

            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into()),
                Ok(len) => self.buf.extend_from_slice(&chunk[..len]),
                Err(err) if err.kind() == ErrorKind::TimedOut => return Err(LinkError::Timeout),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Writes frames to a byte sink.
#[derive(Debug)]
pub struct FrameSink<W> {
    inner: W,
}

impl<W: Write> FrameSink<W> {
    pub fn new(inner: W) -> Self {
        FrameSink { inner }
    }
}

impl<W: Write + Send> FrameWriter for FrameSink<W> {
    fn send(&mut self, frame: &Frame) -> Result<(), LinkError> {
        self.inner.write_all(frame.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }
}
