//! Command router: one inbound text frame -> one device-link or topology call.
//!
//! Errors from the device link or topology are not handled here; they are
//! returned to the session, which ends on any of them.

use crate::error::SessionError;
use crate::outbound::Outbound;
use bridge_protocol::{Action, Command, Identity, Payload};
use device_link::{DeviceLink, Topology};
use tracing::{debug, info, warn};

const SEND_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// What the session should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The client logged out; close with `client exit`.
    Exit,
}

pub struct CommandRouter<'a> {
    pub identity: &'a Identity,
    pub link: &'a dyn DeviceLink,
    pub topology: &'a dyn Topology,
    pub outbound: &'a Outbound,
}

impl CommandRouter<'_> {
    pub async fn route(&self, frame: &str) -> Result<Flow, SessionError> {
        let command = Command::parse(frame)?;
        info!(client_id = %self.identity, frame, "websocket frame");
        self.dispatch(command).await
    }

    pub async fn dispatch(&self, command: Command) -> Result<Flow, SessionError> {
        match command {
            Command::Action(action) => self.run_action(action).await,
            Command::Publish { topic, payload } => {
                self.publish(&topic, &payload).await?;
                Ok(Flow::Continue)
            }
            Command::Unrecognized => {
                warn!(client_id = %self.identity, "unknown message");
                Ok(Flow::Continue)
            }
        }
    }

    async fn run_action(&self, action: Action) -> Result<Flow, SessionError> {
        match action {
            Action::AddTopo => self.topology.add(self.identity).await?,
            Action::DeleteTopo => self.topology.delete(self.identity).await?,
            Action::GetTopo => {
                let snapshot = self.topology.query().await?;
                if !self.outbound.send_text(snapshot) {
                    return Err(SessionError::ConnectionClosed);
                }
            }
            Action::Logout => {
                self.link.logout().await?;
                return Ok(Flow::Exit);
            }
            Action::Other(name) => debug!(action = %name, "ignoring unknown action"),
        }
        Ok(Flow::Continue)
    }

    async fn publish(&self, topic: &str, payload: &Payload) -> Result<(), SessionError> {
        let bytes = payload.to_bytes();
        info!(
            topic,
            send_time = %chrono::Local::now().format(SEND_TIME_FORMAT),
            "publish start"
        );
        self.link.publish(topic, &bytes).await?;
        info!(
            topic,
            send_time = %chrono::Local::now().format(SEND_TIME_FORMAT),
            "publish done"
        );
        Ok(())
    }
}
