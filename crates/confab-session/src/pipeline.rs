//! Ordered, single-flight message processing.
//!
//! The pipeline owns an append-only intake list of pending ciphertext and
//! the sole right to decrypt it. Draining is strictly sequential in
//! enqueue order because ratchet state is order-dependent: decrypting
//! message N+1 before N for the same address desynchronizes the chain and
//! corrupts every later decrypt for it. The drain right is a non-reentrant
//! try-lock; a drain attempted while one is active is a no-op, and the
//! active drain picks up new arrivals before releasing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use confab_crypto::{CiphertextPayload, CryptoError, PayloadKind};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};

use crate::error::SessionError;
use crate::orchestrator::{party_address, SessionOrchestrator};

/// An enqueued ciphertext message awaiting delivery.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub id: u64,
    pub to: String,
    pub from: String,
    pub payload: CiphertextPayload,
    /// Flips false→true exactly once, when the drain delivers the message.
    pub delivered: bool,
}

/// A decrypted message; the append-only output of the pipeline.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub id: u64,
    pub to: String,
    pub from: String,
    pub plaintext: String,
}

/// A per-message drain failure, reported instead of halting the drain.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub id: u64,
    pub to: String,
    pub from: String,
    pub error: SessionError,
}

#[derive(Default)]
struct Intake {
    entries: Vec<PendingMessage>,
    /// Index of the first unprocessed entry.
    cursor: usize,
}

pub struct MessagePipeline {
    orchestrator: Arc<SessionOrchestrator>,
    intake: Mutex<Intake>,
    delivered: RwLock<Vec<DeliveredMessage>>,
    failures: RwLock<Vec<DeliveryFailure>>,
    next_id: AtomicU64,
    drain_right: tokio::sync::Mutex<()>,
    wakeup: Notify,
}

impl MessagePipeline {
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self {
            orchestrator,
            intake: Mutex::new(Intake::default()),
            delivered: RwLock::new(Vec::new()),
            failures: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            drain_right: tokio::sync::Mutex::new(()),
            wakeup: Notify::new(),
        }
    }

    /// Append a message to the intake list and signal the drain task.
    ///
    /// Never suspends. Returns the message id, drawn from the pipeline's
    /// own monotonic sequence.
    pub fn enqueue(&self, to: &str, from: &str, payload: CiphertextPayload) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.intake.lock().entries.push(PendingMessage {
            id,
            to: to.to_string(),
            from: from.to_string(),
            payload,
            delivered: false,
        });
        tracing::debug!(id, to, from, "message enqueued");
        self.wakeup.notify_one();
        id
    }

    /// Process the intake list in enqueue order until it is empty.
    ///
    /// Single-flight: if a drain is already active this returns
    /// immediately; the active drain will process anything enqueued in the
    /// meantime before releasing the drain right.
    pub async fn drain(&self) {
        let Ok(_drain_right) = self.drain_right.try_lock() else {
            return;
        };

        loop {
            // Clone the next entry out; intake guards are never held
            // across an engine await.
            let next = {
                let intake = self.intake.lock();
                intake.entries.get(intake.cursor).cloned()
            };
            let Some(message) = next else { break };

            match self.deliver(&message).await {
                Ok(plaintext) => {
                    {
                        let mut intake = self.intake.lock();
                        let cursor = intake.cursor;
                        intake.entries[cursor].delivered = true;
                    }
                    tracing::debug!(
                        id = message.id,
                        from = message.from.as_str(),
                        to = message.to.as_str(),
                        "message delivered"
                    );
                    self.delivered.write().push(DeliveredMessage {
                        id: message.id,
                        to: message.to.clone(),
                        from: message.from.clone(),
                        plaintext,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        id = message.id,
                        from = message.from.as_str(),
                        to = message.to.as_str(),
                        error = %error,
                        "message failed; continuing with subsequent messages"
                    );
                    self.failures.write().push(DeliveryFailure {
                        id: message.id,
                        to: message.to.clone(),
                        from: message.from.clone(),
                        error,
                    });
                }
            }

            self.intake.lock().cursor += 1;
        }
    }

    /// Decrypt one message against the recipient's store.
    async fn deliver(&self, message: &PendingMessage) -> Result<String, SessionError> {
        let kind = PayloadKind::from_tag(message.payload.tag)
            .ok_or(SessionError::UnknownPayloadKind(message.payload.tag))?;
        let store = self
            .orchestrator
            .store(&message.to)
            .ok_or_else(|| SessionError::IdentityNotFound(message.to.clone()))?;
        let sender = party_address(&message.from);

        // A handshake message may replace a broken session, so only
        // ordinary traffic is refused while the session is poisoned.
        if kind == PayloadKind::Ordinary && store.is_session_poisoned(&sender) {
            return Err(CryptoError::Decryption(
                "session invalidated by an earlier failure".into(),
            )
            .into());
        }

        let engine = self.orchestrator.engine();
        let result = match kind {
            PayloadKind::Handshake => {
                engine
                    .decrypt_handshake_message(&store, &sender, &message.payload)
                    .await
            }
            PayloadKind::Ordinary => {
                engine
                    .decrypt_ordinary_message(&store, &sender, &message.payload)
                    .await
            }
        };

        match result {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(error) => {
                // An AEAD failure against an established session means the
                // ratchet is out of sync; fail fast for this address until
                // a new handshake replaces the session.
                if matches!(error, CryptoError::Decryption(_)) && store.has_session(&sender) {
                    store.poison_session(&sender);
                    tracing::warn!(
                        to = message.to.as_str(),
                        from = message.from.as_str(),
                        "session marked invalid until re-established"
                    );
                }
                Err(error.into())
            }
        }
    }

    /// Background drain task: drains once for any backlog, then once per
    /// enqueue signal until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::debug!("message pipeline drain task started");
        self.drain().await;
        loop {
            tokio::select! {
                () = self.wakeup.notified() => self.drain().await,
                _ = shutdown_rx.recv() => {
                    tracing::debug!("message pipeline shutting down");
                    break;
                }
            }
        }
    }

    /// Read-only view of the delivered-message history, in drain order.
    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.delivered.read().clone()
    }

    /// Per-message failures aggregated across drains, in drain order.
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.failures.read().clone()
    }

    /// Snapshot of the intake list, including already-delivered entries.
    pub fn pending(&self) -> Vec<PendingMessage> {
        self.intake.lock().entries.clone()
    }

    /// True when every enqueued message has been processed.
    pub fn is_idle(&self) -> bool {
        let intake = self.intake.lock();
        intake.cursor == intake.entries.len()
    }
}
