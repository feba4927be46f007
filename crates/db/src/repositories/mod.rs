//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Every status transition is a
//! single conditional statement or one transaction, so several worker
//! processes can share the tables safely.

pub mod batch_job_repo;
pub mod job_repo;

pub use batch_job_repo::BatchJobRepo;
pub use job_repo::JobRepo;
