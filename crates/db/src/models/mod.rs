//! Row models and DTOs for the queue tables.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row plus the insert DTOs used by the store.

pub mod batch_job;
pub mod job;
pub mod status;
