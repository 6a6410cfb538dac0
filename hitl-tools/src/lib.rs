//! HITL Tools - tool contract, registry and built-in tools.
//!
//! Provides:
//! - The `Tool` trait every capability implements
//! - `ToolRegistry`: name → tool lookup, static "requires confirmation" set,
//!   failure-tolerant dispatch
//! - `ClampPolicy`: ceiling for limit-like arguments of list-style tools
//! - Built-in tools: statistics, weather, web search, GitHub repositories

pub mod clamp;
pub mod github;
pub mod registry;
pub mod search;
pub mod statistics;
pub mod traits;
pub mod weather;

pub use traits::{Tool, ToolResult, ToolSpec};

pub use clamp::ClampPolicy;
pub use registry::{ToolOutcome, ToolRegistry};

// Re-export tool implementations
pub use github::{CreateRepositoryTool, DeleteRepositoryTool, GitHubClient, ListRepositoriesTool};
pub use search::WebSearchTool;
pub use statistics::{MeanTool, MedianTool};
pub use weather::WeatherTool;
