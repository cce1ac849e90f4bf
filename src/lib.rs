//! Agentic tool-calling chat core for a personal command center.
//!
//! The [`orchestrator::Orchestrator`] drives one user turn through bounded
//! rounds of "model requests a tool, we run it, the model sees the result",
//! streaming events to the caller as they happen and accounting cost across
//! every model call in the turn. Conversation history, tool execution, the
//! completion service, and cost persistence all sit behind traits so the
//! core can be exercised without any live collaborator.

pub mod context;
pub mod cost;
pub mod errors;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod services;
pub mod store;
