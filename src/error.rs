// src/error.rs

use msp_lib::LinkError;
use thiserror::Error;

/// Errors surfaced by the `msp-link` tool.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid hex input: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid config file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Timed out waiting for a response to code {code}")]
    Timeout { code: u16 },

    #[error("Device reports code {code} as unsupported")]
    Unsupported { code: u16 },
}
