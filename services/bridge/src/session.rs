//! Per-connection session: identity binding, login, frame processing and
//! teardown.
//!
//! # Lifecycle
//! 1. `Connecting`: read `product_sn`/`device_sn`, create a fresh device-link
//!    client, log in. Any failure closes the socket with the error text.
//! 2. `Authenticated` -> `Active`: queue `"login success"`, then register the
//!    inbound forwarder so no downstream push can precede it.
//! 3. `Active`: frames are routed strictly in arrival order while downstream
//!    pushes are queued concurrently on the same outbound writer. Frames
//!    received before the peer's close are still routed.
//! 4. `Closing` -> `Closed`: best-effort logout (skipped if the client already
//!    logged out), close frame with the triggering reason, client released.

use crate::error::SessionError;
use crate::inbound::inbound_forwarder;
use crate::outbound::{Outbound, run_writer};
use crate::router::{CommandRouter, Flow};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use bridge_protocol::{Identity, LOGIN_SUCCESS, close_reasons};
use device_link::{DeviceLink, DeviceLinkConnector, LinkStatus, StatusCallback, Topology};
use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// How long to wait for the peer to answer our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closing,
    Closed,
}

/// Why a session is closing.
#[derive(Debug)]
pub enum CloseCause {
    /// The client sent `{"action":"logout"}`.
    ClientExit,
    /// The device link reported the session invalid.
    LinkOffline(String),
    /// Identity, login or frame processing failed.
    Failed(SessionError),
    /// The WebSocket went away from the peer side.
    PeerClosed,
}

impl CloseCause {
    pub fn reason(&self) -> String {
        match self {
            CloseCause::ClientExit => close_reasons::CLIENT_EXIT.to_owned(),
            CloseCause::LinkOffline(reason) => reason.clone(),
            CloseCause::Failed(err) => err.to_string(),
            CloseCause::PeerClosed => "peer closed".to_owned(),
        }
    }
}

pub struct Session {
    state: SessionState,
    identity: Option<Identity>,
    link: Option<Box<dyn DeviceLink>>,
    logged_out: bool,
    outbound: Outbound,
}

impl Session {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            state: SessionState::Connecting,
            identity: None,
            link: None,
            logged_out: false,
            outbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Bind `identity`, log it in on a fresh client and move to `Active`.
    ///
    /// Link status changes are forwarded to `status_tx`.
    pub async fn open(
        &mut self,
        identity: Identity,
        connector: &dyn DeviceLinkConnector,
        status_tx: mpsc::UnboundedSender<LinkStatus>,
    ) -> Result<(), SessionError> {
        info!(client_id = %identity, "websocket connect");
        let identity = self.identity.insert(identity);
        let link = self.link.insert(connector.create_client());
        link.set_status_callback(status_forwarder(status_tx));
        link.login(identity).await?;
        self.state = SessionState::Authenticated;

        self.outbound.send_text(LOGIN_SUCCESS);
        link.set_message_callback(inbound_forwarder(self.outbound.clone()));
        self.state = SessionState::Active;
        Ok(())
    }

    /// Route one inbound text frame.
    pub async fn handle_frame(
        &mut self,
        frame: &str,
        topology: &dyn Topology,
    ) -> Result<Flow, SessionError> {
        let (Some(identity), Some(link)) = (self.identity.as_ref(), self.link.as_deref()) else {
            return Err(SessionError::UnknownIdentity);
        };
        let flow = CommandRouter {
            identity,
            link,
            topology,
            outbound: &self.outbound,
        }
        .route(frame)
        .await?;
        if flow == Flow::Exit {
            self.logged_out = true;
        }
        Ok(flow)
    }

    /// Process frames until something ends the session.
    ///
    /// Frames already received when the peer closes are still handled in
    /// order; only a call that is suspended once `closed` fires is abandoned.
    pub async fn run_active(
        &mut self,
        frames: &mut mpsc::UnboundedReceiver<String>,
        status_rx: &mut mpsc::UnboundedReceiver<LinkStatus>,
        topology: &dyn Topology,
        closed: &CancellationToken,
    ) -> CloseCause {
        loop {
            tokio::select! {
                biased;
                Some(status) = status_rx.recv() => match status {
                    LinkStatus::Offline { reason } => {
                        warn!(reason = %reason, "device link reported session offline");
                        return CloseCause::LinkOffline(reason);
                    }
                },
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return CloseCause::PeerClosed;
                    };
                    let result = tokio::select! {
                        biased;
                        result = self.handle_frame(&frame, topology) => result,
                        _ = closed.cancelled() => {
                            debug!("peer closed during frame processing");
                            return CloseCause::PeerClosed;
                        }
                    };
                    match result {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit) => return CloseCause::ClientExit,
                        Err(e) => {
                            warn!(error = %e, "frame processing failed");
                            return CloseCause::Failed(e);
                        }
                    }
                }
                // Queue drained; the writer or reader saw the socket go away.
                _ = closed.cancelled() => return CloseCause::PeerClosed,
            }
        }
    }

    /// `Closing` -> `Closed`. Returns the close reason.
    pub async fn close(&mut self, cause: &CloseCause) -> String {
        self.state = SessionState::Closing;
        let reason = cause.reason();
        if let Some(link) = self.link.take() {
            if !self.logged_out {
                if let Err(e) = link.logout().await {
                    warn!(error = %e, "logout during close failed");
                }
                self.logged_out = true;
            }
        }
        self.outbound.close(reason.clone());
        self.state = SessionState::Closed;
        let client_id = self
            .identity
            .as_ref()
            .map(Identity::client_id)
            .unwrap_or_default();
        info!(client_id = %client_id, reason = %reason, "websocket closed");
        reason
    }
}

fn status_forwarder(status_tx: mpsc::UnboundedSender<LinkStatus>) -> StatusCallback {
    Arc::new(move |status: LinkStatus| {
        let _ = status_tx.send(status);
    })
}

// ---------------------------------------------------------------------------
// Socket driver
// ---------------------------------------------------------------------------

/// Run one upgraded connection to completion.
pub async fn run_session(socket: WebSocket, params: HashMap<String, String>, state: AppState) {
    let session_id = Uuid::new_v4();
    let span = info_span!("session", %session_id);
    drive(socket, params, state).instrument(span).await;
}

async fn drive(socket: WebSocket, params: HashMap<String, String>, state: AppState) {
    let (sink, stream) = socket.split();
    let closed = CancellationToken::new();
    let (outbound, outbound_rx) = Outbound::channel();
    let writer = tokio::spawn(run_writer(sink, outbound_rx, closed.clone()).in_current_span());
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let mut reader =
        tokio::spawn(read_frames(stream, frames_tx, closed.clone()).in_current_span());

    let mut session = Session::new(outbound);
    let cause = match Identity::from_query(&params) {
        Err(e) => {
            warn!(error = %e, "rejecting connection");
            CloseCause::Failed(e.into())
        }
        Ok(identity) => {
            let client_id = identity.client_id();
            let (status_tx, mut status_rx) = mpsc::unbounded_channel();
            let opened = tokio::select! {
                biased;
                opened = session.open(identity, state.connector.as_ref(), status_tx) => opened,
                _ = closed.cancelled() => Err(SessionError::ConnectionClosed),
            };
            match opened {
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "login failed");
                    CloseCause::Failed(e)
                }
                Ok(()) => {
                    info!(client_id = %client_id, "session active");
                    session
                        .run_active(
                            &mut frames_rx,
                            &mut status_rx,
                            state.topology.as_ref(),
                            &closed,
                        )
                        .await
                }
            }
        }
    };

    session.close(&cause).await;
    drop(session);
    let _ = writer.await;
    if tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        debug!("peer did not finish close handshake");
        reader.abort();
    }
}

/// Forward text frames in arrival order until the peer goes away.
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    frames: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if frames.send(text.to_string()).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => warn!("ignoring binary frame"),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "peer sent close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    closed.cancel();
}
