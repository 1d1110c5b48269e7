//! In-process device link.
//!
//! `LoopbackHub` keeps the set of online identities and the topology in
//! memory. A publish on `/{product_sn}/{device_sn}/...` is delivered to that
//! identity's message callback when it is online, so two bridge clients can
//! talk to each other without an upstream broker.

use crate::{
    DeviceLink, DeviceLinkConnector, DeviceLinkError, LinkStatus, MessageCallback, StatusCallback,
    Topology,
};
use async_trait::async_trait;
use bridge_protocol::Identity;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Endpoint {
    on_message: Mutex<Option<MessageCallback>>,
    on_status: Mutex<Option<StatusCallback>>,
}

#[derive(Default)]
struct HubInner {
    online: Mutex<HashMap<Identity, Arc<Endpoint>>>,
    topology: Mutex<BTreeSet<Identity>>,
}

impl HubInner {
    fn is_online(&self, identity: &Identity, endpoint: &Arc<Endpoint>) -> bool {
        lock(&self.online)
            .get(identity)
            .is_some_and(|e| Arc::ptr_eq(e, endpoint))
    }
}

/// Shared in-memory broker. Clones share state.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn online_count(&self) -> usize {
        lock(&self.inner.online).len()
    }

    pub fn is_online(&self, identity: &Identity) -> bool {
        lock(&self.inner.online).contains_key(identity)
    }

    /// Force `identity` offline and notify its status callback.
    ///
    /// Returns false when the identity was not online.
    pub fn kick(&self, identity: &Identity, reason: &str) -> bool {
        let Some(endpoint) = lock(&self.inner.online).remove(identity) else {
            return false;
        };
        let callback = lock(&endpoint.on_status).clone();
        if let Some(callback) = callback {
            callback(LinkStatus::Offline {
                reason: reason.to_owned(),
            });
        }
        true
    }
}

impl DeviceLinkConnector for LoopbackHub {
    fn create_client(&self) -> Box<dyn DeviceLink> {
        Box::new(LoopbackLink {
            hub: Arc::clone(&self.inner),
            endpoint: Arc::new(Endpoint::default()),
            identity: Mutex::new(None),
        })
    }
}

#[derive(Serialize)]
struct TopoEntry<'a> {
    #[serde(rename = "productSN")]
    product_sn: &'a str,
    #[serde(rename = "deviceSN")]
    device_sn: &'a str,
}

#[async_trait]
impl Topology for LoopbackHub {
    async fn add(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        lock(&self.inner.topology).insert(identity.clone());
        Ok(())
    }

    async fn delete(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        lock(&self.inner.topology).remove(identity);
        Ok(())
    }

    async fn query(&self) -> Result<String, DeviceLinkError> {
        let topology = lock(&self.inner.topology);
        let entries: Vec<TopoEntry<'_>> = topology
            .iter()
            .map(|id| TopoEntry {
                product_sn: &id.product_sn,
                device_sn: &id.device_sn,
            })
            .collect();
        serde_json::to_string(&entries).map_err(|e| DeviceLinkError::Other(e.to_string()))
    }
}

/// A client handle created by [`LoopbackHub`].
pub struct LoopbackLink {
    hub: Arc<HubInner>,
    endpoint: Arc<Endpoint>,
    identity: Mutex<Option<Identity>>,
}

/// `/{product_sn}/{device_sn}/...` -> target identity.
fn route_target(topic: &str) -> Option<Identity> {
    let mut segments = topic.split('/').filter(|s| !s.is_empty());
    let product_sn = segments.next()?;
    let device_sn = segments.next()?;
    Some(Identity::new(product_sn, device_sn))
}

#[async_trait]
impl DeviceLink for LoopbackLink {
    async fn login(&self, identity: &Identity) -> Result<(), DeviceLinkError> {
        let mut online = lock(&self.hub.online);
        if online.contains_key(identity) {
            return Err(DeviceLinkError::DuplicateLogin(identity.client_id()));
        }
        online.insert(identity.clone(), Arc::clone(&self.endpoint));
        *lock(&self.identity) = Some(identity.clone());
        debug!(client_id = %identity, "loopback login");
        Ok(())
    }

    async fn logout(&self) -> Result<(), DeviceLinkError> {
        let Some(identity) = lock(&self.identity).take() else {
            return Ok(());
        };
        let mut online = lock(&self.hub.online);
        if online
            .get(&identity)
            .is_some_and(|e| Arc::ptr_eq(e, &self.endpoint))
        {
            online.remove(&identity);
            debug!(client_id = %identity, "loopback logout");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), DeviceLinkError> {
        let sender = lock(&self.identity).clone();
        match sender {
            Some(ref id) if self.hub.is_online(id, &self.endpoint) => {}
            _ => return Err(DeviceLinkError::NotLoggedIn),
        }

        let target = route_target(topic)
            .and_then(|id| lock(&self.hub.online).get(&id).cloned());
        let Some(target) = target else {
            debug!(topic, "no online device for topic; dropped");
            return Ok(());
        };
        let callback = lock(&target.on_message).clone();
        if let Some(callback) = callback {
            callback(topic, payload);
        }
        Ok(())
    }

    fn set_message_callback(&self, callback: MessageCallback) {
        *lock(&self.endpoint.on_message) = Some(callback);
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        *lock(&self.endpoint.on_status) = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector() -> (MessageCallback, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: MessageCallback = Arc::new(move |topic: &str, payload: &[u8]| {
            sink.lock().unwrap().push((topic.to_owned(), payload.to_vec()));
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let hub = LoopbackHub::new();
        let id = Identity::new("P1", "D1");
        let first = hub.create_client();
        let second = hub.create_client();
        first.login(&id).await.unwrap();
        let err = second.login(&id).await.unwrap_err();
        assert_eq!(err, DeviceLinkError::DuplicateLogin("P1.D1".to_owned()));
        assert_eq!(err.to_string(), "device P1.D1 already logged in");
        assert_eq!(hub.online_count(), 1);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let hub = LoopbackHub::new();
        let link = hub.create_client();
        link.logout().await.unwrap();
        link.login(&Identity::new("P1", "D1")).await.unwrap();
        link.logout().await.unwrap();
        link.logout().await.unwrap();
        assert_eq!(hub.online_count(), 0);
    }

    #[tokio::test]
    async fn logout_after_kick_does_not_raise_or_evict_new_owner() {
        let hub = LoopbackHub::new();
        let id = Identity::new("P1", "D1");
        let statuses = Arc::new(AtomicUsize::new(0));
        let old = hub.create_client();
        let counter = Arc::clone(&statuses);
        old.set_status_callback(Arc::new(move |status: LinkStatus| {
            assert!(matches!(status, LinkStatus::Offline { .. }));
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        old.login(&id).await.unwrap();

        assert!(hub.kick(&id, "replaced"));
        assert_eq!(statuses.load(Ordering::SeqCst), 1);

        let new = hub.create_client();
        new.login(&id).await.unwrap();
        old.logout().await.unwrap();
        assert!(hub.is_online(&id), "stale logout must not evict the new session");
        assert!(!hub.kick(&Identity::new("P9", "D9"), "nobody"));
    }

    #[tokio::test]
    async fn publish_routes_by_topic_prefix() {
        let hub = LoopbackHub::new();
        let sender = hub.create_client();
        let receiver = hub.create_client();
        let (callback, seen) = collector();
        receiver.set_message_callback(callback);
        sender.login(&Identity::new("P1", "D1")).await.unwrap();
        receiver.login(&Identity::new("P2", "D2")).await.unwrap();

        sender.publish("/P2/D2/downlink", b"ping").await.unwrap();
        sender.publish("/P3/D3/downlink", b"lost").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("/P2/D2/downlink".to_owned(), b"ping".to_vec())]);
    }

    #[tokio::test]
    async fn publish_requires_login() {
        let hub = LoopbackHub::new();
        let link = hub.create_client();
        assert_eq!(
            link.publish("/P1/D1/x", b"x").await.unwrap_err(),
            DeviceLinkError::NotLoggedIn
        );
    }

    #[tokio::test]
    async fn topology_snapshot_is_sorted_json() {
        let hub = LoopbackHub::new();
        hub.add(&Identity::new("P2", "D1")).await.unwrap();
        hub.add(&Identity::new("P1", "D1")).await.unwrap();
        hub.add(&Identity::new("P1", "D1")).await.unwrap();
        assert_eq!(
            hub.query().await.unwrap(),
            r#"[{"productSN":"P1","deviceSN":"D1"},{"productSN":"P2","deviceSN":"D1"}]"#
        );
        hub.delete(&Identity::new("P2", "D1")).await.unwrap();
        hub.delete(&Identity::new("P2", "D1")).await.unwrap();
        assert_eq!(
            hub.query().await.unwrap(),
            r#"[{"productSN":"P1","deviceSN":"D1"}]"#
        );
    }
}
