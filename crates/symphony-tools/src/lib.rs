//! # Symphony Tools
//!
//! External tool clients exposing the core capability set:
//! - `ClaudeTool`: Anthropic-backed reasoning / synthesis / vision
//! - `TavilySearch`: Tavily-backed web search
//!
//! Both are thin `reqwest` JSON clients with a bounded per-tool retry
//! policy for transient failures. Everything behind these clients is a
//! black box to the rest of the system.

mod claude;
mod retry;
mod tavily;

pub use claude::{ClaudeConfig, ClaudeTool};
pub use retry::RetryPolicy;
pub use tavily::{TavilyConfig, TavilySearch};
