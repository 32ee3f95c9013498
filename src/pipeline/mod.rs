//! Unsubscribe pipeline.
//!
//! Every promotional message flows through:
//! 1. `Classifier::classify()` — LLM keep-or-discard label
//! 2. `resolver::resolve()` — header / HTML unsubscribe link discovery
//! 3. `UnsubscribeActor::attempt()` — GET, then one POST fallback
//! 4. `Mailbox::move_to_trash()` — only after a successful unsubscribe
//!
//! **Fail-safe:** a message whose classification fails is preserved, never
//! touched.

pub mod actor;
pub mod classifier;
pub mod orchestrator;
pub mod resolver;
pub mod types;

pub use actor::{HttpTransport, ReqwestTransport, UnsubscribeActor};
pub use classifier::Classifier;
pub use orchestrator::BatchOrchestrator;
pub use types::{
    ActionOutcome, AttemptFailure, AuditEvent, BatchReport, BatchSummary, Classification, DiscoveryMethod,
    HttpMethod, UnsubscribeCandidate,
};
