// bridge-test-utils: Shared test utilities for the device-link bridge.
//
// Provides a WebSocket client for driving the bridge end to end, and
// recording device-link/topology doubles that stand in for the driver-link
// backend.

pub mod mock_ws_client;
pub mod recording_link;

pub use mock_ws_client::{CloseInfo, MockWsClient, WsEvent};
pub use recording_link::{RecordingConnector, RecordingLink, RecordingLinkHandle, RecordingTopology};
