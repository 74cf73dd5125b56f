//! Serializable types the engine broadcasts to its host.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host
//! application can forward them over its own IPC layer unchanged.

pub mod events;
