//! Transport and sidecar interfaces.
//!
//! Concrete wire handling lives outside the core: a transport plugin
//! registers through `DAEMON_TRANSPORT_REGISTER` during activation. The
//! router hands the transport an `mpsc::Sender` in [`Transport::start`];
//! the transport forwards every wire message into it and receives outbound
//! sends back through [`Transport::send`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{DaemonError, Result};

/// One inbound attachment, already downloaded by the transport.
#[derive(Debug, Clone)]
pub enum InboundAttachment {
    Audio(Vec<u8>),
    Image(Vec<u8>),
}

/// One message from the wire.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Full sender identity, possibly with a `/resource` suffix.
    pub sender: String,
    pub text: String,
    pub attachments: Vec<InboundAttachment>,
}

/// A chat transport: the wire on one side, the router on the other.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Begin consuming the wire, forwarding every inbound message into
    /// `inbound`. The transport keeps the sender for its lifetime; dropping
    /// it (connection lost, `stop` called) ends the router's dispatcher.
    /// Must not block — long-lived reading belongs on a spawned task.
    async fn start(&self, inbound: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Stop consuming the wire and release the inbound sender.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Whether sent messages can be edited afterwards.
    fn supports_correction(&self) -> bool {
        false
    }

    /// Send one message; returns a transport message id usable with `edit`.
    async fn send(&self, recipient: &str, text: &str) -> Result<String>;

    /// Replace a previously sent message. Only called when
    /// `supports_correction` is true.
    async fn edit(&self, _recipient: &str, _message_id: &str, _text: &str) -> Result<()> {
        Err(DaemonError::Transport(
            "transport does not support correction".to_string(),
        ))
    }
}

/// Produces text from a media attachment (speech-to-text, OCR/captioning).
#[async_trait]
pub trait TranscriptionWorker: Send + Sync {
    async fn transcribe(&self, payload: &[u8]) -> Result<String>;
}

/// Sidecar server started alongside the transport and stopped on shutdown.
#[async_trait]
pub trait SidecarServer: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Registration slot passed through `DAEMON_TRANSPORT_REGISTER` /
/// `DAEMON_SERVER_REGISTER` hook contexts (via the typed `ext` slot).
#[derive(Default)]
pub struct TransportSlot {
    pub transports: Vec<Arc<dyn Transport>>,
    pub servers: Vec<Arc<dyn SidecarServer>>,
}

impl TransportSlot {
    /// Enforce the startup contract: exactly one transport.
    pub fn into_single_transport(self) -> Result<(Arc<dyn Transport>, Vec<Arc<dyn SidecarServer>>)> {
        match self.transports.len() {
            0 => Err(DaemonError::Config(
                "no transport registered via DAEMON_TRANSPORT_REGISTER".to_string(),
            )),
            1 => {
                let mut transports = self.transports;
                Ok((transports.remove(0), self.servers))
            }
            n => Err(DaemonError::Config(format!(
                "{n} transports registered; exactly one is required"
            ))),
        }
    }
}
