//! Mender: a tool-calling agent loop with reversible file edits.
//!
//! The crate drives an OpenAI-compatible streaming chat endpoint, lets the
//! model call a fixed set of workspace tools (read, search, edit, shell,
//! diagnostics), and records every file mutation in a snapshot engine so each
//! edit can be inspected, reverted on its own, or rolled back to the
//! pre-agent baseline.
//!
//! # Quick start
//!
//! ```no_run
//! use mender::agent::Agent;
//! use mender::config::load_config;
//! use mender::tools::ToolRegistry;
//!
//! # async fn example() {
//! let config = load_config(None).unwrap();
//! let tools = ToolRegistry::new();
//! let mut agent = Agent::new(config, tools);
//! let outcome = agent.send("Summarize src/lib.rs").await.unwrap();
//! println!("{}", outcome.answer);
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod render;
pub mod session;
pub mod snapshot;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod tokens;
pub mod tools;
pub mod types;
