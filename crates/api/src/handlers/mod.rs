pub mod batches;
pub mod jobs;
