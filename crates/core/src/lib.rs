//! # thinkloop core
//!
//! Domain types, capability traits, and error definitions for the thinkloop
//! agent execution engine. Controllers in `thinkloop-agent` are written
//! against the traits defined here and never against a concrete backend.
//!
//! ## Capabilities
//!
//! - [`Provider`]: text generation, blocking or streamed, optionally with tools
//! - [`Tool`] / [`ToolRegistry`]: named tool invocation
//! - [`EventBus`]: publishing progressive updates to whoever listens
//! - [`MessageStore`]: optional persistence of finalized transcripts

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, PlanError, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role, render_transcript};
pub use provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage,
};
pub use store::{InMemoryMessageStore, MessageStore};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
