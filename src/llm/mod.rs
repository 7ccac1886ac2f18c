//! Reasoning service layer
//!
//! The agent loop only needs `complete(prompt) -> text`. This module provides
//! that trait, an Anthropic-backed implementation, and a scripted mock.

pub mod anthropic;
pub mod client;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use client::{LlmError, MockReasoningClient, ReasoningClient, Usage};
