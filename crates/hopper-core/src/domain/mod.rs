//! Domain model (jobs, sessions).

pub mod ids;
pub mod job;

pub use ids::{SessionId, SessionIdAllocator};
pub use job::{Job, JobStatus, ReservedJob};
