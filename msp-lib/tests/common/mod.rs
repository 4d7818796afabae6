//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use msp_lib::decoder::Decoder;
#[allow(unused_imports)]
pub use msp_lib::dispatcher::{Request, TransmitKind};
#[allow(unused_imports)]
pub use msp_lib::encoder::{encode, encode_frame, encode_v1, encode_v2};
#[allow(unused_imports)]
pub use msp_lib::error::LinkError;
#[allow(unused_imports)]
pub use msp_lib::frame::{Direction, Frame, ProtocolVersion, Response};
#[allow(unused_imports)]
pub use msp_lib::link::LinkEngine;
#[allow(unused_imports)]
pub use msp_lib::LinkConfig;
#[allow(unused_imports)]
pub use std::time::{Duration, Instant};
#[allow(unused_imports)]
pub use tokio::sync::oneshot;

/// MSP_API_VERSION (code 1)
#[allow(dead_code)]
pub const MSP_API_VERSION: u16 = 1;

/// MSP_STATUS (code 101)
#[allow(dead_code)]
pub const MSP_STATUS: u16 = 101;

/// MSP_SET_RAW_RC (code 200)
#[allow(dead_code)]
pub const MSP_SET_RAW_RC: u16 = 200;

/// A v2-only code
#[allow(dead_code)]
pub const MSP2_COMMON_SETTING: u16 = 0x1003;

/// Real MSP_API_VERSION reply: protocol 0, API 1.44
#[allow(dead_code)]
pub const API_VERSION_RESPONSE: &str = "244d3e030100012c2f";

/// Build a frame the way the device would send it.
#[allow(dead_code)]
pub fn device_frame(code: u16, payload: &[u8]) -> Bytes {
    encode_frame(msp_lib::encoder::version_for(code), Direction::FromDevice, code, payload)
        .expect("Failed to encode device frame")
}

/// A connected engine with default settings.
#[allow(dead_code)]
pub fn connected_engine() -> LinkEngine {
    let mut engine = LinkEngine::default();
    engine.connect();
    engine
}

/// Queue a request and return the receiving side of its completion.
#[allow(dead_code)]
pub fn send(
    engine: &mut LinkEngine,
    request: Request,
    now: Instant,
) -> (bool, oneshot::Receiver<Option<Response>>) {
    let (tx, rx) = oneshot::channel();
    let accepted = engine.send(request, tx, None, now);
    (accepted, rx)
}

/// Drain every queued transmission, reporting each as written at `now`.
#[allow(dead_code)]
pub fn flush(engine: &mut LinkEngine, now: Instant) -> Vec<(Bytes, TransmitKind)> {
    let mut written = Vec::new();
    while let Some(transmit) = engine.poll_transmit() {
        written.push((transmit.bytes.clone(), transmit.kind));
        engine.on_transmitted(transmit, true, now);
    }
    written
}

/// Route library logs to the test harness. Honors RUST_LOG.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
