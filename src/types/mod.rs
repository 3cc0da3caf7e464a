//! Core domain types for the task agent.

pub mod ids;
pub mod status;
pub mod task;

pub use ids::{DeliveryId, EventId, MessageId};
pub use status::{
    DEFAULT_OWNER, DEFAULT_REPOSITORY, DEFAULT_TARGET_URL, EventRef, MISSING_SHA, Status, TaskState,
};
pub use task::{EventTasks, Task, TaskConfig, TaskConfigError, TaskOutcome, TaskResult};
