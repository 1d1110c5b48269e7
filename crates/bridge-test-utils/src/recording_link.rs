// recording_link: device-link doubles that record every call.
//
// `RecordingConnector` hands out `RecordingLink`s and keeps a handle to each,
// so a test can inspect logins/logouts/publishes after the fact and drive the
// downstream direction (messages, offline reports) from any thread.

use async_trait::async_trait;
use bridge_protocol::Identity;
use device_link::{
    DeviceLink, DeviceLinkConnector, DeviceLinkError, LinkStatus, MessageCallback, StatusCallback,
    Topology,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LinkRecord {
    logins: Vec<Identity>,
    logouts: usize,
    publishes: Vec<(String, Vec<u8>)>,
    message_callback_sets: usize,
    message_callback: Option<MessageCallback>,
    status_callback: Option<StatusCallback>,
}

#[derive(Default, Clone)]
struct Behavior {
    login_error: Option<DeviceLinkError>,
    publish_error: Option<DeviceLinkError>,
    publish_delay: Option<Duration>,
}

/// Test-side view of one link created by [`RecordingConnector`].
#[derive(Clone, Default)]
pub struct RecordingLinkHandle {
    record: Arc<Mutex<LinkRecord>>,
}

impl RecordingLinkHandle {
    pub fn logins(&self) -> Vec<Identity> {
        lock(&self.record).logins.clone()
    }

    pub fn logout_count(&self) -> usize {
        lock(&self.record).logouts
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.record).publishes.clone()
    }

    pub fn message_callback_sets(&self) -> usize {
        lock(&self.record).message_callback_sets
    }

    /// Deliver a downstream message through the registered callback.
    ///
    /// Returns false when no callback is registered yet.
    pub fn push_downstream(&self, topic: &str, payload: &[u8]) -> bool {
        let callback = lock(&self.record).message_callback.clone();
        match callback {
            Some(callback) => {
                callback(topic, payload);
                true
            }
            None => false,
        }
    }

    /// Report the link's session as gone, as a broker disconnect would.
    pub fn report_offline(&self, reason: &str) -> bool {
        let callback = lock(&self.record).status_callback.clone();
        match callback {
            Some(callback) => {
                callback(LinkStatus::Offline {
                    reason: reason.to_owned(),
                });
                true
            }
            None => false,
        }
    }
}

pub struct RecordingLink {
    handle: RecordingLinkHandle,
    behavior: Behavior,
}

#[async_trait]
impl DeviceLink for RecordingLink {
    async fn login(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        if let Some(err) = &self.behavior.login_error {
            return Err(err.clone());
        }
        lock(&self.handle.record).logins.push(identity.clone());
        Ok(())
    }

    async fn logout(&self) -> Result<(), DeviceLinkError> {
        lock(&self.handle.record).logouts += 1;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeviceLinkError> {
        if let Some(delay) = self.behavior.publish_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.behavior.publish_error {
            return Err(err.clone());
        }
        lock(&self.handle.record)
            .publishes
            .push((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        let mut record = lock(&self.handle.record);
        record.message_callback_sets += 1;
        record.message_callback = Some(callback);
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        lock(&self.handle.record).status_callback = Some(callback);
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingConnector {
    links: Arc<Mutex<Vec<RecordingLinkHandle>>>,
    behavior: Arc<Mutex<Behavior>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent login fails with `err`.
    pub fn fail_login(&self, err: DeviceLinkError) {
        lock(&self.behavior).login_error = Some(err);
    }

    pub fn fail_publish(&self, err: DeviceLinkError) {
        lock(&self.behavior).publish_error = Some(err);
    }

    pub fn delay_publish(&self, delay: Duration) {
        lock(&self.behavior).publish_delay = Some(delay);
    }

    pub fn created(&self) -> usize {
        lock(&self.links).len()
    }

    pub fn link(&self, index: usize) -> Option<RecordingLinkHandle> {
        lock(&self.links).get(index).cloned()
    }

    pub fn last_link(&self) -> Option<RecordingLinkHandle> {
        lock(&self.links).last().cloned()
    }
}

impl DeviceLinkConnector for RecordingConnector {
    fn create_client(&self) -> Box<dyn DeviceLink> {
        let handle = RecordingLinkHandle::default();
        lock(&self.links).push(handle.clone());
        Box::new(RecordingLink {
            handle,
            behavior: lock(&self.behavior).clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TopologyRecord {
    snapshot: String,
    added: Vec<Identity>,
    deleted: Vec<Identity>,
    queries: usize,
    error: Option<DeviceLinkError>,
}

/// Topology double returning a fixed snapshot.
#[derive(Clone, Default)]
pub struct RecordingTopology {
    record: Arc<Mutex<TopologyRecord>>,
}

impl RecordingTopology {
    pub fn new(snapshot: &str) -> Self {
        let topology = Self::default();
        topology.set_snapshot(snapshot);
        topology
    }

    pub fn set_snapshot(&self, snapshot: &str) {
        lock(&self.record).snapshot = snapshot.to_owned();
    }

    /// Every subsequent call fails with `err`.
    pub fn fail_with(&self, err: DeviceLinkError) {
        lock(&self.record).error = Some(err);
    }

    pub fn added(&self) -> Vec<Identity> {
        lock(&self.record).added.clone()
    }

    pub fn deleted(&self) -> Vec<Identity> {
        lock(&self.record).deleted.clone()
    }

    pub fn query_count(&self) -> usize {
        lock(&self.record).queries
    }
}

#[async_trait]
impl Topology for RecordingTopology {
    async fn add(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        let mut record = lock(&self.record);
        if let Some(err) = &record.error {
            return Err(err.clone());
        }
        record.added.push(identity.clone());
        Ok(())
    }

    async fn delete(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        let mut record = lock(&self.record);
        if let Some(err) = &record.error {
            return Err(err.clone());
        }
        record.deleted.push(identity.clone());
        Ok(())
    }

    async fn query(&self) -> Result<String, DeviceLinkError> {
        let mut record = lock(&self.record);
        if let Some(err) = &record.error {
            return Err(err.clone());
        }
        record.queries += 1;
        Ok(record.snapshot.clone())
    }
}
