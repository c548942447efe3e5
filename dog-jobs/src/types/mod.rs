pub mod ids;
pub mod record;

pub use ids::JobId;
pub use record::{JobRecord, JobStatus};
