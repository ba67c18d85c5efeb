//! Many-to-many relations through junction records.
//!
//! # Responsibility
//! - `junction`: junction row type, query and link protocols.
//! - `endpoint`: helpers on the entities taking part in a junction.

pub mod endpoint;
pub mod junction;
