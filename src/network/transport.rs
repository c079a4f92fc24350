use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::common::{Conversation, InboundEvent, OutboundEvent};
use crate::error::Result;

const LINK_BUFFER: usize = 100;

/// One established connection. Closing of `inbound` means the connection dropped.
pub struct Link {
    pub outbound: mpsc::Sender<OutboundEvent>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

impl Link {
    /// Builds a link plus the far ends of its two queues.
    pub fn pair() -> (Self, mpsc::Receiver<OutboundEvent>, mpsc::Sender<InboundEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_BUFFER);
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

/// Opens live channel connections. Framing and security live behind this seam.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, conversation: &Conversation) -> Result<Link>;
}

/// Newline-delimited JSON over TCP.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, conversation: &Conversation) -> Result<Link> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        log::info!("Connected to {} for conversation {}", self.addr, conversation.id());

        let (read_half, mut write_half) = stream.into_split();
        let (link, mut outbound_rx, inbound_tx) = Link::pair();

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let mut line = match serde_json::to_vec(&event) {
                    Ok(line) => line,
                    Err(err) => {
                        log::warn!("Failed to serialize outbound event: {err}");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(err) = write_half.write_all(&line).await {
                    log::warn!("Channel write failed: {err}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let next = tokio::select! {
                    _ = inbound_tx.closed() => break,
                    next = lines.next_line() => next,
                };
                match next {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<InboundEvent>(&line) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => log::warn!("Skipping unreadable channel event ({err}): {line}"),
                    },
                    Ok(None) => {
                        log::info!("Channel closed by remote");
                        break;
                    }
                    Err(err) => {
                        log::warn!("Channel read failed: {err}");
                        break;
                    }
                }
            }
        });

        Ok(link)
    }
}
