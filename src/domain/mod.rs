//! Core domain types
//!
//! Chat messages, tool calls, token accounting, and the declarative
//! resource shapes the engine consumes.

mod message;
mod resources;

pub use message::*;
pub use resources::*;

#[cfg(test)]
mod message_test;
