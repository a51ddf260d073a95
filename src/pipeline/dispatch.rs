use super::{Hook, Plugin, PluginInfo, PipelineEvent, RetryDirective};
use crate::task::{Response, Task, TaskResult};
use crate::{PipelineError, PluginError, TaskError};
use serde_json::Value;
use std::cmp::Reverse;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

struct PluginRecord {
    info: PluginInfo,
    plugin: Arc<dyn Plugin>,
    enabled: bool,
}

/// Calls a hook on every enabled plugin of a category, in order
///
/// The first error aborts the dispatch. With a sink, each hook's output is
/// handed to it.
macro_rules! broadcast_hook {
    ($pipeline:expr, $category:ident, $hook:expr, |$hooks:ident| $call:expr) => {
        broadcast_hook!($pipeline, $category, $hook, |$hooks| $call, |_output| ())
    };
    (
        $pipeline:expr, $category:ident, $hook:expr,
        |$hooks:ident| $call:expr,
        |$output:pat_param| $sink:expr
    ) => {
        for (name, plugin) in $pipeline.enabled() {
            let Some($hooks) = plugin.$category() else {
                continue;
            };
            let $output = $call
                .await
                .map_err(|e| $pipeline.hook_failed(&name, $hook, e))?;
            $sink;
        }
    };
}

/// Threads a value through a category's transform hooks
///
/// A hook returning `Some` replaces the value, `None` passes it on, and an
/// error returns from the enclosing function.
macro_rules! transform_hook {
    (
        $pipeline:expr, $category:ident, $hook:expr, $value:expr,
        |$hooks:ident, $current:ident| $call:expr
    ) => {{
        let mut $current = $value;
        for (name, plugin) in $pipeline.enabled() {
            let Some($hooks) = plugin.$category() else {
                continue;
            };
            match $call.await {
                Ok(Some(next)) => $current = next,
                Ok(None) => {}
                Err(e) => return Err($pipeline.hook_failed(&name, $hook, e)),
            }
        }
        Ok($current)
    }};
}

/// Ordered plugin registry and hook dispatcher
///
/// Each dispatch works on a snapshot of the enabled plugins, so registering
/// or disabling a plugin while a hook is running affects the next dispatch
/// only.
pub struct Pipeline {
    records: RwLock<Vec<PluginRecord>>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribes to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PluginRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<PluginRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    /// Adds a plugin
    ///
    /// # Errors
    ///
    /// * `PipelineError::AlreadyRegistered` - a plugin with the same name exists
    /// * `PipelineError::MissingDependency` - a declared dependency is not registered
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PipelineError> {
        let info = plugin.info();
        {
            let mut records = self.write();

            if records.iter().any(|r| r.info.name == info.name) {
                return Err(PipelineError::AlreadyRegistered(info.name));
            }
            if let Some(missing) = info
                .dependencies
                .iter()
                .find(|dep| !records.iter().any(|r| &r.info.name == *dep))
            {
                return Err(PipelineError::MissingDependency {
                    plugin: info.name.clone(),
                    dependency: missing.clone(),
                });
            }

            records.push(PluginRecord {
                info: info.clone(),
                plugin,
                enabled: true,
            });
            // Stable, so equal priorities keep registration order
            records.sort_by_key(|r| Reverse(r.info.priority));
        }

        tracing::info!(
            plugin = %info.name,
            version = %info.version,
            priority = info.priority,
            "Plugin registered"
        );
        self.emit(PipelineEvent::PluginRegistered {
            name: info.name,
            version: info.version,
        });
        Ok(())
    }

    /// Removes a plugin and hands it back
    ///
    /// # Errors
    ///
    /// * `PipelineError::NotRegistered` - no plugin has that name
    /// * `PipelineError::RequiredBy` - other plugins declare it as a dependency
    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Plugin>, PipelineError> {
        let plugin = {
            let mut records = self.write();

            let index = records
                .iter()
                .position(|r| r.info.name == name)
                .ok_or_else(|| PipelineError::NotRegistered(name.to_string()))?;

            let dependents: Vec<String> = records
                .iter()
                .filter(|r| r.info.dependencies.iter().any(|d| d == name))
                .map(|r| r.info.name.clone())
                .collect();
            if !dependents.is_empty() {
                return Err(PipelineError::RequiredBy {
                    plugin: name.to_string(),
                    dependents,
                });
            }

            records.remove(index).plugin
        };

        tracing::info!(plugin = %name, "Plugin unregistered");
        self.emit(PipelineEvent::PluginUnregistered {
            name: name.to_string(),
        });
        Ok(plugin)
    }

    pub fn enable(&self, name: &str) -> Result<(), PipelineError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), PipelineError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PipelineError> {
        let changed = {
            let mut records = self.write();
            let record = records
                .iter_mut()
                .find(|r| r.info.name == name)
                .ok_or_else(|| PipelineError::NotRegistered(name.to_string()))?;
            let changed = record.enabled != enabled;
            record.enabled = enabled;
            changed
        };

        if changed {
            let name = name.to_string();
            if enabled {
                tracing::info!(plugin = %name, "Plugin enabled");
                self.emit(PipelineEvent::PluginEnabled { name });
            } else {
                tracing::info!(plugin = %name, "Plugin disabled");
                self.emit(PipelineEvent::PluginDisabled { name });
            }
        }
        Ok(())
    }

    /// Registered plugins in dispatch order
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.read().iter().map(|r| r.info.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.read()
            .iter()
            .find(|r| r.info.name == name)
            .map(|r| Arc::clone(&r.plugin))
    }

    /// Whether the named plugin is enabled, or None if it is not registered
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.read()
            .iter()
            .find(|r| r.info.name == name)
            .map(|r| r.enabled)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn enabled(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        self.read()
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.info.name.clone(), Arc::clone(&r.plugin)))
            .collect()
    }

    fn hook_failed(&self, plugin: &str, hook: Hook, error: PluginError) -> PipelineError {
        tracing::warn!(plugin = %plugin, hook = %hook, error = %error, "Plugin hook failed");
        self.emit(PipelineEvent::PluginError {
            plugin: plugin.to_string(),
            hook,
            error: error.clone(),
        });
        PipelineError::Hook {
            plugin: plugin.to_string(),
            hook,
            source: error,
        }
    }

    // ===== Lifecycle (broadcast) =====

    pub async fn initialize(&self) -> Result<(), PipelineError> {
        broadcast_hook!(self, lifecycle, Hook::Init, |hooks| hooks.on_init());
        Ok(())
    }

    pub async fn start(&self) -> Result<(), PipelineError> {
        broadcast_hook!(self, lifecycle, Hook::Start, |hooks| hooks.on_start());
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), PipelineError> {
        broadcast_hook!(self, lifecycle, Hook::Stop, |hooks| hooks.on_stop());
        Ok(())
    }

    pub async fn destroy(&self) -> Result<(), PipelineError> {
        broadcast_hook!(self, lifecycle, Hook::Destroy, |hooks| hooks.on_destroy());
        Ok(())
    }

    // ===== Task hooks =====

    /// Transform chain; an error rejects the task
    pub async fn on_task_create(&self, task: Task) -> Result<Task, PipelineError> {
        transform_hook!(self, task_hooks, Hook::TaskCreate, task, |hooks, current| {
            hooks.on_task_create(&current)
        })
    }

    pub async fn on_task_start(&self, task: &Task) -> Result<(), PipelineError> {
        broadcast_hook!(self, task_hooks, Hook::TaskStart, |hooks| hooks.on_task_start(task));
        Ok(())
    }

    pub async fn on_task_complete(&self, result: TaskResult) -> Result<TaskResult, PipelineError> {
        transform_hook!(self, task_hooks, Hook::TaskComplete, result, |hooks, current| {
            hooks.on_task_complete(&current)
        })
    }

    /// Broadcast; returns every retry directive the plugins produced
    pub async fn on_task_error(
        &self,
        task: &Task,
        error: &TaskError,
    ) -> Result<Vec<RetryDirective>, PipelineError> {
        let mut directives = Vec::new();
        broadcast_hook!(
            self,
            task_hooks,
            Hook::TaskError,
            |hooks| hooks.on_task_error(task, error),
            |directive| directives.extend(directive)
        );
        Ok(directives)
    }

    pub async fn on_task_retry(&self, task: &Task, attempt: u32) -> Result<(), PipelineError> {
        broadcast_hook!(self, task_hooks, Hook::TaskRetry, |hooks| {
            hooks.on_task_retry(task, attempt)
        });
        Ok(())
    }

    // ===== Request / response =====

    pub async fn on_request(&self, task: Task) -> Result<Task, PipelineError> {
        transform_hook!(self, request_hooks, Hook::Request, task, |hooks, current| {
            hooks.on_request(&current)
        })
    }

    pub async fn on_response(
        &self,
        task: &Task,
        response: Response,
    ) -> Result<Response, PipelineError> {
        transform_hook!(self, request_hooks, Hook::Response, response, |hooks, current| {
            hooks.on_response(task, &current)
        })
    }

    // ===== Extraction =====

    pub async fn on_parse(
        &self,
        task: &Task,
        response: &Response,
        parsed: Value,
    ) -> Result<Value, PipelineError> {
        transform_hook!(self, extraction_hooks, Hook::Parse, parsed, |hooks, current| {
            hooks.on_parse(task, response, &current)
        })
    }

    pub async fn on_follow(
        &self,
        task: &Task,
        follow_ups: Vec<Task>,
    ) -> Result<Vec<Task>, PipelineError> {
        transform_hook!(self, extraction_hooks, Hook::Follow, follow_ups, |hooks, current| {
            hooks.on_follow(task, &current)
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("plugins", &self.plugins())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{LifecycleHooks, RequestHooks, TaskHooks};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Test plugin that tags requests and records calls
    struct Tagger {
        info: PluginInfo,
        calls: Arc<Mutex<Vec<String>>>,
        fail_on_request: bool,
        started: AtomicUsize,
    }

    impl Tagger {
        fn new(name: &str, priority: i32, calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                info: PluginInfo::new(name, "1.0.0").with_priority(priority),
                calls,
                fail_on_request: false,
                started: AtomicUsize::new(0),
            }
        }

        fn depends_on(mut self, name: &str) -> Self {
            self.info = self.info.depends_on(name);
            self
        }

        fn failing(mut self) -> Self {
            self.fail_on_request = true;
            self
        }
    }

    impl Plugin for Tagger {
        fn info(&self) -> PluginInfo {
            self.info.clone()
        }

        fn lifecycle(&self) -> Option<&dyn LifecycleHooks> {
            Some(self)
        }

        fn task_hooks(&self) -> Option<&dyn TaskHooks> {
            Some(self)
        }

        fn request_hooks(&self) -> Option<&dyn RequestHooks> {
            Some(self)
        }
    }

    #[async_trait]
    impl LifecycleHooks for Tagger {
        async fn on_start(&self) -> Result<(), PluginError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl TaskHooks for Tagger {
        async fn on_task_error(
            &self,
            _task: &Task,
            _error: &TaskError,
        ) -> Result<Option<RetryDirective>, PluginError> {
            Ok(Some(RetryDirective {
                delay: Duration::from_millis(self.info.priority as u64),
                attempt: 1,
            }))
        }
    }

    #[async_trait]
    impl RequestHooks for Tagger {
        async fn on_request(&self, task: &Task) -> Result<Option<Task>, PluginError> {
            self.calls.lock().unwrap().push(self.info.name.clone());
            if self.fail_on_request {
                return Err(PluginError::Failed("boom".to_string()));
            }
            let seen = task.headers.get("x-chain").cloned().unwrap_or_default();
            Ok(Some(
                task.clone()
                    .with_header("x-chain", format!("{}{}", seen, self.info.name)),
            ))
        }
    }

    /// Plugin with no hooks at all
    struct Inert(&'static str);

    impl Plugin for Inert {
        fn info(&self) -> PluginInfo {
            PluginInfo::new(self.0, "0.1.0")
        }
    }

    fn calls() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn names(pipeline: &Pipeline) -> Vec<String> {
        pipeline.plugins().into_iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_sorted_by_priority_stable() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Tagger::new("low", 1, log.clone()))).unwrap();
        pipeline.register(Arc::new(Tagger::new("first", 5, log.clone()))).unwrap();
        pipeline.register(Arc::new(Tagger::new("high", 9, log.clone()))).unwrap();
        pipeline.register(Arc::new(Tagger::new("second", 5, log))).unwrap();

        assert_eq!(names(&pipeline), vec!["high", "first", "second", "low"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Inert("a"))).unwrap();
        let err = pipeline.register(Arc::new(Inert("a"))).unwrap_err();

        assert_eq!(err, PipelineError::AlreadyRegistered("a".to_string()));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_dependency_must_be_registered_first() {
        let log = calls();
        let pipeline = Pipeline::new();

        let err = pipeline
            .register(Arc::new(Tagger::new("b", 0, log.clone()).depends_on("a")))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingDependency { ref plugin, ref dependency }
                if plugin == "b" && dependency == "a"
        ));
        assert!(pipeline.is_empty());

        pipeline.register(Arc::new(Tagger::new("a", 0, log.clone()))).unwrap();
        pipeline
            .register(Arc::new(Tagger::new("b", 0, log).depends_on("a")))
            .unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_unregister_blocked_by_dependent() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Tagger::new("a", 0, log.clone()))).unwrap();
        pipeline
            .register(Arc::new(Tagger::new("b", 0, log).depends_on("a")))
            .unwrap();

        let Err(err) = pipeline.unregister("a") else {
            panic!("unregister should fail while b depends on a");
        };
        assert_eq!(
            err,
            PipelineError::RequiredBy {
                plugin: "a".to_string(),
                dependents: vec!["b".to_string()],
            }
        );

        pipeline.unregister("b").unwrap();
        pipeline.unregister("a").unwrap();
        assert!(pipeline.is_empty());
        assert!(matches!(
            pipeline.unregister("a"),
            Err(PipelineError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_enable_disable_events() {
        let pipeline = Pipeline::new();
        let mut events = pipeline.subscribe();
        pipeline.register(Arc::new(Inert("a"))).unwrap();

        pipeline.disable("a").unwrap();
        assert_eq!(pipeline.is_enabled("a"), Some(false));
        pipeline.enable("a").unwrap();
        assert_eq!(pipeline.is_enabled("a"), Some(true));
        assert!(pipeline.disable("missing").is_err());

        let received: Vec<PipelineEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                PipelineEvent::PluginRegistered {
                    name: "a".to_string(),
                    version: "0.1.0".to_string()
                },
                PipelineEvent::PluginDisabled {
                    name: "a".to_string()
                },
                PipelineEvent::PluginEnabled {
                    name: "a".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_transform_chain_in_priority_order() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Tagger::new("b", 1, log.clone()))).unwrap();
        pipeline.register(Arc::new(Inert("inert"))).unwrap();
        pipeline.register(Arc::new(Tagger::new("a", 2, log.clone()))).unwrap();

        let task = pipeline
            .on_request(Task::new("https://example.com/"))
            .await
            .unwrap();

        assert_eq!(task.headers.get("x-chain").map(String::as_str), Some("ab"));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_none_keeps_value() {
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Inert("inert"))).unwrap();

        let task = pipeline
            .on_task_create(Task::new("https://example.com/").with_priority(4))
            .await
            .unwrap();
        assert_eq!(task.priority, 4);
        assert_eq!(task.url, "https://example.com/");
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_skipped() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Tagger::new("a", 0, log.clone()))).unwrap();
        pipeline.disable("a").unwrap();

        let task = pipeline
            .on_request(Task::new("https://example.com/"))
            .await
            .unwrap();

        assert!(task.headers.get("x-chain").is_none());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hook_error_aborts_and_is_announced() {
        let log = calls();
        let pipeline = Pipeline::new();
        let mut events = pipeline.subscribe();
        pipeline
            .register(Arc::new(Tagger::new("bad", 5, log.clone()).failing()))
            .unwrap();
        pipeline.register(Arc::new(Tagger::new("after", 1, log.clone()))).unwrap();

        let err = pipeline
            .on_request(Task::new("https://example.com/"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::Hook {
                plugin: "bad".to_string(),
                hook: Hook::Request,
                source: PluginError::Failed("boom".to_string()),
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["bad"]);

        let announced = std::iter::from_fn(|| events.try_recv().ok()).any(|e| {
            matches!(e, PipelineEvent::PluginError { ref plugin, hook: Hook::Request, .. } if plugin == "bad")
        });
        assert!(announced);
    }

    #[tokio::test]
    async fn test_task_error_collects_directives() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(Tagger::new("a", 30, log.clone()))).unwrap();
        pipeline.register(Arc::new(Inert("inert"))).unwrap();
        pipeline.register(Arc::new(Tagger::new("b", 20, log))).unwrap();

        let directives = pipeline
            .on_task_error(&Task::new("https://example.com/"), &TaskError::other("x"))
            .await
            .unwrap();

        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].delay, Duration::from_millis(30));
        assert_eq!(directives[1].delay, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_lifecycle_broadcast() {
        let log = calls();
        let pipeline = Pipeline::new();
        let tagger = Arc::new(Tagger::new("a", 0, log));
        pipeline.register(tagger.clone()).unwrap();
        pipeline.register(Arc::new(Inert("inert"))).unwrap();

        pipeline.initialize().await.unwrap();
        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();

        assert_eq!(tagger.started.load(Ordering::SeqCst), 1);
    }

    /// Records which lifecycle hook ran
    struct PhaseRecorder(Arc<Mutex<Vec<String>>>);

    impl Plugin for PhaseRecorder {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("lifecycle", "1.0.0")
        }

        fn lifecycle(&self) -> Option<&dyn LifecycleHooks> {
            Some(self)
        }
    }

    #[async_trait]
    impl LifecycleHooks for PhaseRecorder {
        async fn on_init(&self) -> Result<(), PluginError> {
            self.0.lock().unwrap().push("init".to_string());
            Ok(())
        }

        async fn on_start(&self) -> Result<(), PluginError> {
            self.0.lock().unwrap().push("start".to_string());
            Ok(())
        }

        async fn on_stop(&self) -> Result<(), PluginError> {
            self.0.lock().unwrap().push("stop".to_string());
            Ok(())
        }

        async fn on_destroy(&self) -> Result<(), PluginError> {
            self.0.lock().unwrap().push("destroy".to_string());
            Err(PluginError::Failed("teardown".to_string()))
        }
    }

    #[tokio::test]
    async fn test_each_lifecycle_phase_reaches_its_own_hook() {
        let log = calls();
        let pipeline = Pipeline::new();
        pipeline.register(Arc::new(PhaseRecorder(log.clone()))).unwrap();

        pipeline.initialize().await.unwrap();
        pipeline.stop().await.unwrap();
        pipeline.start().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["init", "stop", "start"]);

        let Err(err) = pipeline.destroy().await else {
            panic!("destroy hook error should propagate");
        };
        assert!(matches!(err, PipelineError::Hook { hook: Hook::Destroy, .. }));
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("destroy"));
    }
}
