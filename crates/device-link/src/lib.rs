//! Device-link contracts consumed by the bridge.
//!
//! A [`DeviceLink`] is the per-identity handle through which one sub-device
//! logs in, publishes and receives downstream messages. [`Topology`] is the
//! process-wide registry of sub-devices. Both are trait objects so the bridge
//! can run against the in-process [`LoopbackHub`] or any other backend.

pub mod loopback;

use async_trait::async_trait;
use bridge_protocol::Identity;
use std::sync::Arc;

pub use loopback::{LoopbackHub, LoopbackLink};

/// Invoked with `(topic, message)` for every downstream message addressed to
/// the logged-in identity. May run on any thread.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Invoked when the link's own session state changes underneath the caller.
pub type StatusCallback = Arc<dyn Fn(LinkStatus) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// The link no longer considers this identity logged in.
    Offline { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceLinkError {
    #[error("device link offline")]
    Offline,
    #[error("sub device offline")]
    DeviceOffline,
    #[error("device link timeout")]
    Timeout,
    #[error("device {0} already logged in")]
    DuplicateLogin(String),
    #[error("device not logged in")]
    NotLoggedIn,
    #[error("{0}")]
    Other(String),
}

/// One sub-device session on the device link.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    async fn login(&self, identity: &Identity) -> Result<(), DeviceLinkError>;

    /// Must succeed when already logged out.
    async fn logout(&self) -> Result<(), DeviceLinkError>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeviceLinkError>;

    /// Register the downstream message callback. Called once per client.
    fn set_message_callback(&self, callback: MessageCallback);

    fn set_status_callback(&self, callback: StatusCallback);
}

/// Builds a fresh, unshared [`DeviceLink`] for each bridge session.
pub trait DeviceLinkConnector: Send + Sync {
    fn create_client(&self) -> Box<dyn DeviceLink>;
}

/// Process-wide sub-device topology. Implementations must tolerate
/// concurrent calls from many sessions.
#[async_trait]
pub trait Topology: Send + Sync {
    async fn add(&self, identity: &Identity) -> Result<(), DeviceLinkError>;

    async fn delete(&self, identity: &Identity) -> Result<(), DeviceLinkError>;

    /// Serialized snapshot of the whole topology.
    async fn query(&self) -> Result<String, DeviceLinkError>;
}
