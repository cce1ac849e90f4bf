//! These models represent the objects passed around by the orchestrator
//!
//! There are a few related formats we need to interact with:
//! - the caller's request/response shapes, handled by whatever transport
//!   sits in front of the orchestrator
//! - completion-API messages/tools, sent to the LLM provider
//! - the serialized snapshot the conversation store persists
//!
//! These overlap but do not match exactly, so everything is converted into
//! the internal structs here at the boundary and back out with to/from
//! helpers in the provider layer.
pub mod message;
pub mod role;
pub mod tool;
