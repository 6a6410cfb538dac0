//! HITL Checkpoint - durable, append-only execution state for agent threads.
//!
//! Every step boundary of the execution engine appends one [`Checkpoint`]
//! holding the full message history of a thread plus an explicit marker for
//! what has to happen next. The latest checkpoint of a thread is always
//! enough to resume it, including after a process restart.
//!
//! ```text
//! submit ──► [cp 1: next=none] ──► [cp 2: next=resume_tools, pending=delete_repository]
//!                                        │
//! resume(approved) ◄─────────────────────┘──► [cp 3: next=none]
//! ```
//!
//! Backends:
//! - [`SqliteCheckpointStore`] for durable storage
//! - [`MemoryCheckpointStore`] for tests and ephemeral sessions

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use store::{CheckpointStore, StoreError};
pub use types::{
    call_id_in_use, unresolved_calls, Checkpoint, Message, NextStep, PendingConfirmation,
    ToolInvocationRequest,
};
