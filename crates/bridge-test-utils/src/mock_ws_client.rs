use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// What the server did next, from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Text(String),
    /// Close frame received; `None` when the server sent no payload.
    Closed(Option<CloseInfo>),
    /// The stream ended without a close frame.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connect to `base` with the two identity query parameters set.
    pub async fn connect_as(
        base: &str,
        product_sn: &str,
        device_sn: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::connect(&format!(
            "{base}?product_sn={product_sn}&device_sn={device_sn}"
        ))
        .await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    pub async fn send_json(
        &mut self,
        value: &serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(value)?;
        self.send_text(&json).await
    }

    pub async fn recv_event(&mut self) -> Result<WsEvent, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WsEvent::Text(text.to_string())),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(WsEvent::Closed(frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    })));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(WsEvent::Ended),
            }
        }
    }

    /// `recv_event` bounded by `timeout`; a timeout is an error.
    pub async fn recv_event_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<WsEvent, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_event()).await {
            Ok(event) => event,
            Err(_) => Err("timed out waiting for server frame".into()),
        }
    }

    pub async fn recv_text(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match self.recv_event_timeout(Duration::from_secs(5)).await? {
            WsEvent::Text(text) => Ok(text),
            other => Err(format!("expected text frame, got {other:?}").into()),
        }
    }

    /// Wait for the server's close frame and return its reason.
    pub async fn recv_close_reason(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        match self.recv_event_timeout(Duration::from_secs(5)).await? {
            WsEvent::Closed(Some(info)) => Ok(info.reason),
            other => Err(format!("expected close frame, got {other:?}").into()),
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
