//! Session lifecycle orchestration and ordered message processing for
//! Confab's two-party encrypted messaging demo.
//!
//! The [`SessionOrchestrator`] drives identity creation and handshakes
//! against the process-wide [`KeyDirectory`]; the [`MessagePipeline`]
//! drains pending ciphertext in strict enqueue order, which is what keeps
//! each session's ratchet state consistent. [`MessageExchange`] bundles
//! both behind the surface the presentation layer talks to.

pub mod directory;
pub mod error;
pub mod exchange;
pub mod orchestrator;
pub mod pipeline;

pub use directory::KeyDirectory;
pub use error::SessionError;
pub use exchange::MessageExchange;
pub use orchestrator::SessionOrchestrator;
pub use pipeline::{DeliveredMessage, DeliveryFailure, MessagePipeline, PendingMessage};
