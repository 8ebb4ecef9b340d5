//! Execution-engine routing
//!
//! An agent's engine reference selects how it runs: no reference means
//! the built-in loop, the reserved name "a2a" routes to the A2A
//! JSON-RPC engine, and any other name resolves an external HTTP
//! engine implementing `POST /execute`.

pub mod a2a;
pub mod external;

/// Reserved engine name routing to the built-in A2A engine
pub const EXECUTION_ENGINE_A2A: &str = "a2a";

#[cfg(test)]
mod a2a_test;
