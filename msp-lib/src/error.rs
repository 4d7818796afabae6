use std::io;
use thiserror::Error;

/// The primary error type for the `msp-lib` library.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link is not connected")]
    NotConnected,

    #[error("Link is in offline mode, requests are not sent")]
    Offline,

    #[error("Command code {code} does not fit this frame version (max {max})")]
    CodeOutOfRange { code: u16, max: u16 },

    #[error("Payload of {len} bytes exceeds the frame limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Request for code {code} was dropped before a response arrived")]
    Cancelled { code: u16 },

    #[error("Link task has shut down")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
