//! Outbound side of a session's WebSocket.
//!
//! Router replies and downstream pushes never touch the socket directly. They
//! enqueue whole frames on an [`Outbound`] handle, and a single writer task
//! owning the sink drains the queue, so two frames can never interleave.

use axum::extract::ws::{CloseFrame, Message, close_code};
use bridge_protocol::truncate_close_reason;
use futures_util::{Sink, SinkExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Close the socket with this reason. Always the last frame written.
    Close(String),
}

/// Cloneable sender for one session's outbound frames.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a text frame. Returns false once the writer has stopped.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(OutboundFrame::Text(text.into())).is_ok()
    }

    pub fn close(&self, reason: impl Into<String>) -> bool {
        self.tx.send(OutboundFrame::Close(reason.into())).is_ok()
    }
}

/// Drain `rx` into `sink` until a close frame is written, the queue is
/// dropped, or the sink fails. A failed write cancels `closed`.
pub async fn run_writer<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    closed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "websocket write failed");
                    closed.cancel();
                    return;
                }
            }
            OutboundFrame::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: truncate_close_reason(&reason).to_owned().into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "close frame not delivered");
                }
                return;
            }
        }
    }
}
