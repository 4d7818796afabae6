pub mod bus;
pub mod checksum;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod link;
pub mod timer;


// Re-export the types most callers need
pub use client::LinkClient;
pub use codec::MspCodec;
pub use config::LinkConfig;
pub use decoder::Decoder;
pub use dispatcher::{Completion, Request};
pub use error::LinkError;
pub use frame::{Direction, Frame, ProtocolVersion, Response};
pub use link::{LinkEngine, LinkStats};
