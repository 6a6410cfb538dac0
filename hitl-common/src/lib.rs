//! Settings, the plumbing error type and logging bootstrap used by every
//! `hitl-*` crate.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AgentConfig, ClampConfig, Config, ModelConfig, ObservabilityConfig, StorageConfig,
    ToolsConfig,
};
pub use error::{Error, Result, ResultExt};
pub use logging::LogFormat;

