//! State tracking for tasks and domains
//!
//! # Components
//!
//! - `TaskStatus` / `TaskState`: the lifecycle record of an admitted task
//! - `DomainState`: per-domain request timing used by the politeness plugins

mod domain_state;
mod task_state;

pub use domain_state::DomainState;
pub use task_state::{TaskState, TaskStatus};
