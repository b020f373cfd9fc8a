//! Top-level facade tying the directory, orchestrator, and pipeline
//! together behind one handle.

use std::sync::Arc;

use confab_crypto::{CiphertextPayload, ProtocolEngine, RatchetEngine};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::directory::KeyDirectory;
use crate::error::SessionError;
use crate::orchestrator::SessionOrchestrator;
use crate::pipeline::{DeliveredMessage, DeliveryFailure, MessagePipeline, PendingMessage};

/// A complete in-process messaging fabric: every party created through
/// this handle shares one key directory and one delivery pipeline.
pub struct MessageExchange {
    orchestrator: Arc<SessionOrchestrator>,
    pipeline: Arc<MessagePipeline>,
}

impl MessageExchange {
    pub fn new() -> Self {
        Self::with_engine(Arc::new(RatchetEngine::new()))
    }

    /// Build an exchange over a caller-supplied protocol engine.
    pub fn with_engine(engine: Arc<dyn ProtocolEngine>) -> Self {
        let orchestrator = Arc::new(SessionOrchestrator::new(
            engine,
            Arc::new(KeyDirectory::new()),
        ));
        let pipeline = Arc::new(MessagePipeline::new(Arc::clone(&orchestrator)));
        Self {
            orchestrator,
            pipeline,
        }
    }

    /// Create a party, publishing its prekey bundle to the shared
    /// directory. Returns the party's registration id.
    pub fn create_identity(&self, name: &str) -> u32 {
        self.orchestrator.create_identity(name)
    }

    /// Run the sender-side handshake of `local` against `peer`'s
    /// published bundle.
    pub async fn establish_session(&self, local: &str, peer: &str) -> Result<(), SessionError> {
        self.orchestrator.establish_session(local, peer).await
    }

    /// Encrypt `text` under the `from`→`to` session and enqueue the
    /// resulting ciphertext for delivery. Returns the message id.
    pub async fn send(&self, from: &str, to: &str, text: &str) -> Result<u64, SessionError> {
        let payload = self
            .orchestrator
            .encrypt_message(from, to, text.as_bytes())
            .await?;
        Ok(self.pipeline.enqueue(to, from, payload))
    }

    /// Enqueue an externally produced ciphertext, as a transport would.
    pub fn enqueue(&self, to: &str, from: &str, payload: CiphertextPayload) -> u64 {
        self.pipeline.enqueue(to, from, payload)
    }

    /// Drain the pipeline on the caller's task. A no-op if a drain is
    /// already in flight (including the background task's).
    pub async fn drain(&self) {
        self.pipeline.drain().await;
    }

    /// Spawn the background drain task. Send on the returned channel (or
    /// drop it) to stop the task.
    pub fn start(&self) -> (JoinHandle<()>, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(Arc::clone(&self.pipeline).run(shutdown_rx));
        (task, shutdown_tx)
    }

    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.pipeline.delivered()
    }

    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.pipeline.failures()
    }

    pub fn pending(&self) -> Vec<PendingMessage> {
        self.pipeline.pending()
    }

    pub fn has_identity(&self, name: &str) -> bool {
        self.orchestrator.has_identity(name)
    }

    pub fn has_session(&self, local: &str, peer: &str) -> bool {
        self.orchestrator.has_session(local, peer)
    }

    pub fn registration_id(&self, name: &str) -> Option<u32> {
        self.orchestrator.registration_id(name)
    }
}

impl Default for MessageExchange {
    fn default() -> Self {
        Self::new()
    }
}
