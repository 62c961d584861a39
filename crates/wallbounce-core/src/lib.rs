//! Core library for the Wall-Bounce multi-provider consensus analyzer.
//!
//! Dispatches a query to two or more heterogeneous LLM providers
//! (subprocess CLIs, in-process SDKs, or MCP servers), normalizes their
//! responses, scores inter-response agreement, and synthesizes a single
//! consensus answer with a confidence score. Also owns multi-turn
//! sessions with vendor rotation, risk-graded approval workflows for
//! side-effecting tool invocations, and ordered incremental event
//! streaming.
//!
//! The [`orchestrator::Orchestrator`] is the entry point; everything
//! else is a collaborator it is constructed with.

pub mod approval;
pub mod config;
pub mod consensus;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod kv;
pub mod orchestrator;
pub mod provider;
pub mod safety;
pub mod session;

pub use error::*;

/// Returns the version of the wallbounce-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
