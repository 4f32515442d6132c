//! Queue module: tubes and the job store that owns them.

mod store;
mod tube;

pub use store::{DEFAULT_TUBE_RETENTION, JobStore};
pub use tube::Tube;
