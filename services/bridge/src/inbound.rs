//! Inbound forwarder: downstream device-link messages -> WebSocket text frames.

use crate::outbound::Outbound;
use device_link::MessageCallback;
use std::sync::Arc;
use tracing::{Span, debug, trace};

/// Build the message callback registered with a session's device link.
///
/// The device link may call it from any thread; each message becomes one
/// queued text frame. Logs land in the session span that was current when the
/// callback was built.
pub fn inbound_forwarder(outbound: Outbound) -> MessageCallback {
    let span = Span::current();
    Arc::new(move |topic: &str, message: &[u8]| {
        let _entered = span.enter();
        trace!(topic, bytes = message.len(), "downstream message");
        let text = String::from_utf8_lossy(message).into_owned();
        if !outbound.send_text(text) {
            debug!(topic, "session closed, downstream message dropped");
        }
    })
}
