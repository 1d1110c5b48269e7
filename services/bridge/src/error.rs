//! Error types for the bridge service.

use bridge_protocol::IdentityError;
use device_link::DeviceLinkError;
use std::net::SocketAddr;
use thiserror::Error;

/// Everything that ends a session. The display text is sent to the peer as
/// the WebSocket close reason.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A frame arrived on a session without a bound identity.
    #[error("unknown client identify")]
    UnknownIdentity,

    #[error(transparent)]
    DeviceLink(#[from] DeviceLinkError),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("websocket closed")]
    ConnectionClosed,
}

/// Failures starting the listener.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
