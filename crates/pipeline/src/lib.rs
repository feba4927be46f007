//! Request-side operations on the generation queue.
//!
//! Everything a client can do to the queue goes through here: creating
//! jobs and batches, previewing prompts, reading status and cancelling.
//! Inputs are validated and normalised before anything is persisted; the
//! worker trusts stored rows as-is.

pub mod batches;
pub mod error;
pub mod jobs;

pub use error::PipelineError;
