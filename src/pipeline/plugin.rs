use super::{PluginInfo, RetryDirective};
use crate::task::{Response, Task, TaskResult};
use crate::{PluginError, TaskError};
use async_trait::async_trait;
use serde_json::Value;

/// A pipeline extension
///
/// Every hook group is optional. A plugin opts into a group by returning
/// itself from the matching accessor:
///
/// ```ignore
/// impl Plugin for MyPlugin {
///     fn info(&self) -> PluginInfo {
///         PluginInfo::new("my-plugin", "1.0.0")
///     }
///
///     fn task_hooks(&self) -> Option<&dyn TaskHooks> {
///         Some(self)
///     }
/// }
/// ```
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    fn lifecycle(&self) -> Option<&dyn LifecycleHooks> {
        None
    }

    fn task_hooks(&self) -> Option<&dyn TaskHooks> {
        None
    }

    fn request_hooks(&self) -> Option<&dyn RequestHooks> {
        None
    }

    fn extraction_hooks(&self) -> Option<&dyn ExtractionHooks> {
        None
    }
}

/// Pipeline lifecycle notifications (broadcast)
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_init(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_destroy(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Task lifecycle hooks
///
/// `on_task_create` and `on_task_complete` are transforms: returning
/// `Some` replaces the value passed to the next plugin. Raising from
/// `on_task_create` rejects the task.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    async fn on_task_create(&self, _task: &Task) -> Result<Option<Task>, PluginError> {
        Ok(None)
    }

    async fn on_task_start(&self, _task: &Task) -> Result<(), PluginError> {
        Ok(())
    }

    async fn on_task_complete(
        &self,
        _result: &TaskResult,
    ) -> Result<Option<TaskResult>, PluginError> {
        Ok(None)
    }

    /// Called for a failed task; may ask for the task to be run again
    async fn on_task_error(
        &self,
        _task: &Task,
        _error: &TaskError,
    ) -> Result<Option<RetryDirective>, PluginError> {
        Ok(None)
    }

    async fn on_task_retry(&self, _task: &Task, _attempt: u32) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Request/response transforms, run around the fetch
#[async_trait]
pub trait RequestHooks: Send + Sync {
    async fn on_request(&self, _task: &Task) -> Result<Option<Task>, PluginError> {
        Ok(None)
    }

    async fn on_response(
        &self,
        _task: &Task,
        _response: &Response,
    ) -> Result<Option<Response>, PluginError> {
        Ok(None)
    }
}

/// Extraction transforms
#[async_trait]
pub trait ExtractionHooks: Send + Sync {
    /// Transforms the data extracted from a page
    async fn on_parse(
        &self,
        _task: &Task,
        _response: &Response,
        _parsed: &Value,
    ) -> Result<Option<Value>, PluginError> {
        Ok(None)
    }

    /// Transforms the follow-up tasks discovered on a page
    async fn on_follow(
        &self,
        _task: &Task,
        _follow_ups: &[Task],
    ) -> Result<Option<Vec<Task>>, PluginError> {
        Ok(None)
    }
}
