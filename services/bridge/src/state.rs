use device_link::{DeviceLinkConnector, Topology};
use std::sync::Arc;

/// Shared by every session: the factory for per-session device-link
/// clients and the process-wide topology.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<dyn DeviceLinkConnector>,
    pub topology: Arc<dyn Topology>,
}

impl AppState {
    pub fn new(connector: Arc<dyn DeviceLinkConnector>, topology: Arc<dyn Topology>) -> Self {
        Self {
            connector,
            topology,
        }
    }
}
