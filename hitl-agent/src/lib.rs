//! HITL Agent - the execution core.
//!
//! Drives a conversation turn through the model and the tool registry,
//! suspending before tools that need a human decision and resuming from the
//! latest checkpoint once the decision arrives.
//!
//! ## Architecture
//!
//! ```text
//! submit(thread, text) ──► ExecutionEngine ──► ModelClient::converse
//!                               │
//!                               ├── safe calls ──► ToolRegistry::invoke
//!                               ├── dangerous call ──► checkpoint(next = ResumeTools) ──► Suspended
//!                               └── every step ──► CheckpointStore::save
//!
//! resume(thread, approved) ──► ExecutionEngine ──► (invoke | inject denial) ──► continue loop
//! ```

pub mod engine;
pub mod event;
pub mod model;
pub mod openai;
pub mod thread;

pub use engine::{EngineError, ExecutionEngine, ExecutionResult, ExecutionStatus, ThreadStatus};
pub use event::{EventSink, ExecutionEvent, NoopSink};
pub use model::{ModelClient, ModelError, ModelTurn};
pub use openai::OpenAiCompatibleClient;
pub use thread::thread_title;

pub use hitl_checkpoint::{Message, PendingConfirmation, ToolInvocationRequest};
