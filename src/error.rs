use crate::frame::FrameError;
use crate::provider::ProviderError;
use crate::tlv::TlvError;

/// Crate-level error, mostly seen on the client side.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Payload(#[from] TlvError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The server answered with an error frame.
    #[error("server error {code}: {message}")]
    Remote { code: u32, message: String },

    /// The response frame carried a different request id than the request.
    #[error("request id mismatch: sent {sent}, got {got}")]
    RequestIdMismatch { sent: u32, got: u32 },

    /// The response frame carried an unexpected message type.
    #[error("unexpected response type {got:#04x} to request {sent:#04x}")]
    UnexpectedResponse { sent: u8, got: u8 },

    /// Read requests are capped at 1 MiB before they reach the wire.
    #[error("read length {0} exceeds the 1 MiB request limit")]
    ReadTooLarge(u32),

    /// The value does not fit a single TLV record (65535 bytes).
    #[error("{0} does not fit a single TLV record")]
    ValueTooLarge(&'static str),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("invalid offset {0:?}")]
    InvalidOffset(String),

    #[error("invalid hex string {0:?}")]
    InvalidHex(String),
}
