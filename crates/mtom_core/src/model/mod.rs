//! Entity model shared by relation participants.
//!
//! # Responsibility
//! - Define the minimal entity capability the relation layer depends on.
//! - Keep row <-> entity conversion in one place.
//!
//! # Invariants
//! - Every entity is identified by one `EntityId` per table.

pub mod entity;
