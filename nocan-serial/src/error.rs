use nocan::frame::FrameError;
use thiserror::Error;

/// Errors raised by the serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        source: serialport::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame: {0}")]
    Frame(FrameError),

    #[error("read timed out")]
    Timeout,

    #[error("link is closed")]
    Closed,
}

impl From<FrameError> for LinkError {
    fn from(value: FrameError) -> Self {
        LinkError::Frame(value)
    }
}
