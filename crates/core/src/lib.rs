//! Domain types, validation and pure logic shared by every mayagen crate.
//!
//! Nothing in here touches the database or the network. The
//! [`provider::GenerationProvider`] trait is the only seam to the outside
//! world and is implemented elsewhere.

pub mod error;
pub mod generation;
pub mod naming;
pub mod prompt;
pub mod provider;
pub mod types;
