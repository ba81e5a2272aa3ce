//! Domain model (IDs, task records, lease keys).

pub mod ids;
pub mod lease_key;
pub mod record;

pub use ids::{Id, IdMarker, TaskId};
pub use lease_key::{LeaseKey, deadline_after};
pub use record::{DEFAULT_PRIORITY, TOP_PRIORITY, TaskRecord};
