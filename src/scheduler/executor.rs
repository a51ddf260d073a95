use crate::task::{Task, TaskResult};
use crate::TaskError;
use async_trait::async_trait;
use std::future::Future;

/// Performs the work of a single task
///
/// The scheduler does not care what happens inside; the crawl engine's
/// executor fetches and parses a page. Timeouts are the executor's job.
/// Any async closure `Fn(Task) -> Future<Output = Result<TaskResult, TaskError>>`
/// is an executor.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: Task) -> Result<TaskResult, TaskError>;
}

#[async_trait]
impl<F, Fut> TaskExecutor for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskResult, TaskError>> + Send + 'static,
{
    async fn execute(&self, task: Task) -> Result<TaskResult, TaskError> {
        (self)(task).await
    }
}
