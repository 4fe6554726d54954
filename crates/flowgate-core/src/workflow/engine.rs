//! Workflow engine: registration, watch lifecycle, and trigger dispatch.
//!
//! `WorkflowEngine` owns the set of registered workflows and one watch
//! handle per workflow while running. Trigger events from every watcher
//! funnel into a single channel; a dispatcher task spawns one independent
//! pipeline run per event, so a slow run never delays event delivery or
//! other runs.
//!
//! `stop()` tears down watchers and the dispatcher but leaves in-flight
//! runs alone; they finish on their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowgate_types::event::WorkflowEvent;
use flowgate_types::workflow::{
    ActionSpec, DefinitionError, RunOutcome, TriggerSpec, WorkflowDefinition, validate_definition,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::quota::{InMemoryUsageStore, UsageStore};

use super::executor::PipelineExecutor;
use super::trigger::{TriggerError, TriggerEvent, TriggerWatcher};

/// Buffer between watchers and the dispatcher.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("trigger setup failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot returned by [`WorkflowEngine::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub workflow_count: usize,
    pub workflows: Vec<WorkflowSummary>,
}

/// One registered workflow, as reported by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub name: String,
    pub owner: Option<String>,
    pub trigger: TriggerSpec,
    pub action_count: usize,
    /// Whether a watch is currently live for this workflow.
    pub watching: bool,
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

struct Running<H> {
    handles: HashMap<Uuid, H>,
    events: mpsc::Sender<TriggerEvent>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

/// Registers workflows, watches their triggers, and runs their pipelines.
pub struct WorkflowEngine<W: TriggerWatcher, S: UsageStore = InMemoryUsageStore> {
    executor: Arc<PipelineExecutor<S>>,
    watcher: W,
    workflows: Arc<DashMap<Uuid, Arc<WorkflowDefinition>>>,
    /// `Some` while started. Also serializes registration against start/stop.
    running: Mutex<Option<Running<W::Handle>>>,
}

impl<W: TriggerWatcher, S: UsageStore> WorkflowEngine<W, S> {
    pub fn new(executor: Arc<PipelineExecutor<S>>, watcher: W) -> Self {
        Self {
            executor,
            watcher,
            workflows: Arc::new(DashMap::new()),
            running: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<PipelineExecutor<S>> {
        &self.executor
    }

    pub fn event_bus(&self) -> &EventBus {
        self.executor.event_bus()
    }

    /// Register a workflow and return its id.
    ///
    /// Names are unique. If the engine is already running, the new workflow
    /// is watched immediately; a watch failure rolls the registration back.
    pub async fn register_workflow(
        &self,
        name: impl Into<String>,
        owner: Option<String>,
        trigger: TriggerSpec,
        actions: Vec<ActionSpec>,
    ) -> Result<Uuid, EngineError> {
        let definition = WorkflowDefinition::new(name, owner, trigger, actions);
        validate_definition(&definition)?;

        let mut running = self.running.lock().await;
        if self.workflows.iter().any(|w| w.name == definition.name) {
            return Err(DefinitionError::DuplicateName(definition.name).into());
        }

        let definition = Arc::new(definition);
        let id = definition.id;

        if let Some(running) = running.as_mut() {
            let handle = self.watcher.watch(&definition, running.events.clone())?;
            running.handles.insert(id, handle);
            self.announce_watch(&definition);
        }
        self.workflows.insert(id, Arc::clone(&definition));

        tracing::info!(
            workflow_id = %id,
            workflow = definition.name.as_str(),
            trigger = definition.trigger.kind(),
            pattern = definition.trigger.pattern(),
            actions = definition.actions.len(),
            "workflow registered"
        );
        Ok(id)
    }

    /// Begin watching every registered workflow.
    ///
    /// Any watch setup failure is fatal: no watch is left running and the
    /// error is returned. Calling `start` while running is a no-op.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let mut handles = HashMap::new();
        let workflows = self.sorted_workflows();
        for definition in &workflows {
            let handle = self.watcher.watch(definition, tx.clone()).map_err(|e| {
                tracing::error!(
                    workflow = definition.name.as_str(),
                    error = %e,
                    "failed to start trigger watcher"
                );
                e
            })?;
            handles.insert(definition.id, handle);
        }
        for definition in &workflows {
            self.announce_watch(definition);
        }

        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch(
            rx,
            cancel.clone(),
            Arc::clone(&self.workflows),
            Arc::clone(&self.executor),
        ));

        *running = Some(Running {
            handles,
            events: tx,
            cancel,
            dispatcher,
        });
        tracing::info!(workflows = workflows.len(), "workflow engine started");
        Ok(())
    }

    /// Stop watching. In-flight runs are not cancelled.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();
        for (id, handle) in running.handles {
            drop(handle);
            if let Some(definition) = self.workflows.get(&id) {
                self.event_bus().publish(WorkflowEvent::WatcherStopped {
                    workflow_id: id,
                    workflow_name: definition.name.clone(),
                });
            }
        }
        if let Err(e) = running.dispatcher.await {
            tracing::warn!(error = %e, "trigger dispatcher ended abnormally");
        }
        tracing::info!("workflow engine stopped");
    }

    /// Whether the engine is watching, and what it knows about.
    pub async fn get_status(&self) -> EngineStatus {
        let running = self.running.lock().await;
        let workflows: Vec<WorkflowSummary> = self
            .sorted_workflows()
            .into_iter()
            .map(|definition| WorkflowSummary {
                id: definition.id,
                name: definition.name.clone(),
                owner: definition.owner.clone(),
                trigger: definition.trigger.clone(),
                action_count: definition.actions.len(),
                watching: running
                    .as_ref()
                    .is_some_and(|r| r.handles.contains_key(&definition.id)),
                registered_at: definition.registered_at,
            })
            .collect();

        EngineStatus {
            running: running.is_some(),
            workflow_count: workflows.len(),
            workflows,
        }
    }

    /// Look up a registered workflow by id.
    pub fn workflow(&self, id: Uuid) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(&id).map(|w| Arc::clone(w.value()))
    }

    /// Look up a registered workflow by name.
    pub fn workflow_by_name(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows
            .iter()
            .find(|w| w.name == name)
            .map(|w| Arc::clone(w.value()))
    }

    /// Run a workflow now against `resource`, bypassing its watcher.
    pub async fn trigger(&self, id: Uuid, resource: &Path) -> Result<RunOutcome, EngineError> {
        let definition = self.workflow(id).ok_or(EngineError::WorkflowNotFound(id))?;
        tracing::info!(
            workflow = definition.name.as_str(),
            resource = %resource.display(),
            "manual trigger"
        );
        Ok(self.executor.execute(&definition, resource).await)
    }

    fn sorted_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.iter().map(|w| Arc::clone(w.value())).collect();
        workflows.sort_by_key(|w| (w.registered_at, w.id));
        workflows
    }

    fn announce_watch(&self, definition: &WorkflowDefinition) {
        let path: PathBuf = self.watcher.watch_path(definition);
        tracing::info!(
            workflow_id = %definition.id,
            workflow = definition.name.as_str(),
            path = %path.display(),
            "trigger watcher started"
        );
        self.event_bus().publish(WorkflowEvent::WatcherStarted {
            workflow_id: definition.id,
            workflow_name: definition.name.clone(),
            path,
        });
    }
}

/// Spawn one run per trigger event until cancelled.
async fn dispatch<S: UsageStore>(
    mut events: mpsc::Receiver<TriggerEvent>,
    cancel: CancellationToken,
    workflows: Arc<DashMap<Uuid, Arc<WorkflowDefinition>>>,
    executor: Arc<PipelineExecutor<S>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(definition) = workflows.get(&event.workflow_id).map(|w| Arc::clone(w.value())) else {
                    tracing::warn!(
                        workflow_id = %event.workflow_id,
                        "trigger event for unknown workflow, dropping"
                    );
                    continue;
                };

                tracing::debug!(
                    workflow = definition.name.as_str(),
                    path = %event.path.display(),
                    "trigger fired"
                );
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    executor.execute(&definition, &event.path).await;
                });
            }
        }
    }
    tracing::debug!("trigger dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use flowgate_types::workflow::ActionParams;
    use tokio::sync::broadcast;

    use crate::workflow::actions::BuiltinActions;
    use crate::workflow::notifier::RecordingNotifier;
    use crate::workflow::registry::ActionRegistry;

    type Senders = Arc<StdMutex<HashMap<Uuid, mpsc::Sender<TriggerEvent>>>>;

    /// Watcher whose events are fired by the test.
    #[derive(Default, Clone)]
    struct ChannelWatcher {
        senders: Senders,
        fail: bool,
    }

    struct ChannelHandle {
        id: Uuid,
        senders: Senders,
    }

    impl Drop for ChannelHandle {
        fn drop(&mut self) {
            self.senders.lock().unwrap().remove(&self.id);
        }
    }

    impl TriggerWatcher for ChannelWatcher {
        type Handle = ChannelHandle;

        fn watch(
            &self,
            workflow: &WorkflowDefinition,
            events: mpsc::Sender<TriggerEvent>,
        ) -> Result<ChannelHandle, TriggerError> {
            if self.fail {
                return Err(TriggerError::RootInaccessible {
                    path: self.watch_path(workflow),
                    reason: "no such directory".to_string(),
                });
            }
            self.senders.lock().unwrap().insert(workflow.id, events);
            Ok(ChannelHandle {
                id: workflow.id,
                senders: Arc::clone(&self.senders),
            })
        }

        fn watch_path(&self, _workflow: &WorkflowDefinition) -> PathBuf {
            PathBuf::from("/watch")
        }
    }

    impl ChannelWatcher {
        async fn fire(&self, id: Uuid, path: &str) -> bool {
            let tx = self.senders.lock().unwrap().get(&id).cloned();
            match tx {
                Some(tx) => tx.send(TriggerEvent::new(id, path)).await.is_ok(),
                None => false,
            }
        }
    }

    struct Harness {
        engine: WorkflowEngine<ChannelWatcher>,
        watcher: ChannelWatcher,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn harness_with(watcher: ChannelWatcher) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ActionRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let builtins = BuiltinActions::new(
            Arc::clone(&registry),
            notifier.clone(),
            dir.path().join("out"),
        );
        let executor = Arc::new(PipelineExecutor::new(registry, builtins, EventBus::new(64)));
        Harness {
            engine: WorkflowEngine::new(executor, watcher.clone()),
            watcher,
            notifier,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(ChannelWatcher::default())
    }

    fn notify_actions() -> Vec<ActionSpec> {
        vec![ActionSpec::new(
            "notify",
            ActionParams::new()
                .with("destination", "X")
                .with("message", "Processed {filename}"),
        )]
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<WorkflowEvent>) -> WorkflowEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.is_terminal() {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_invalid_definitions() {
        let h = harness();
        h.engine
            .register_workflow("invoice-flow", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();

        let dup = h
            .engine
            .register_workflow("invoice-flow", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap_err();
        assert!(matches!(
            dup,
            EngineError::Definition(DefinitionError::DuplicateName(_))
        ));

        let empty = h
            .engine
            .register_workflow("empty", None, TriggerSpec::file_arrival("*.pdf"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            empty,
            EngineError::Definition(DefinitionError::NoActions(_))
        ));

        assert_eq!(h.engine.get_status().await.workflow_count, 1);
    }

    #[tokio::test]
    async fn trigger_event_runs_pipeline() {
        let h = harness();
        let id = h
            .engine
            .register_workflow("invoice-flow", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();
        let mut rx = h.engine.event_bus().subscribe();

        h.engine.start().await.unwrap();
        assert!(h.watcher.fire(id, "/watch/report.pdf").await);

        match next_terminal(&mut rx).await {
            WorkflowEvent::RunCompleted {
                workflow_name,
                trigger_resource,
                ..
            } => {
                assert_eq!(workflow_name, "invoice-flow");
                assert_eq!(trigger_resource, PathBuf::from("/watch/report.pdf"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.notifier.sent()[0].message, "Processed report.pdf");

        h.engine.stop().await;
    }

    #[tokio::test]
    async fn status_reflects_lifecycle() {
        let h = harness();
        h.engine
            .register_workflow("a", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();
        h.engine
            .register_workflow("b", None, TriggerSpec::file_arrival("*.csv"), notify_actions())
            .await
            .unwrap();

        let status = h.engine.get_status().await;
        assert!(!status.running);
        assert_eq!(status.workflow_count, 2);
        assert_eq!(
            status.workflows.iter().map(|w| w.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(status.workflows.iter().all(|w| !w.watching));

        h.engine.start().await.unwrap();
        let status = h.engine.get_status().await;
        assert!(status.running);
        assert!(status.workflows.iter().all(|w| w.watching));

        h.engine.stop().await;
        assert!(!h.engine.get_status().await.running);
    }

    #[tokio::test]
    async fn stop_removes_watches_and_announces() {
        let h = harness();
        let id = h
            .engine
            .register_workflow("a", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();
        let mut rx = h.engine.event_bus().subscribe();

        h.engine.start().await.unwrap();
        h.engine.stop().await;

        assert!(!h.watcher.fire(id, "/watch/late.pdf").await);
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                WorkflowEvent::WatcherStarted { .. } => "started",
                WorkflowEvent::WatcherStopped { .. } => "stopped",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "stopped"]);
    }

    #[tokio::test]
    async fn watcher_setup_failure_is_fatal() {
        let h = harness_with(ChannelWatcher {
            fail: true,
            ..Default::default()
        });
        h.engine
            .register_workflow("a", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();

        let err = h.engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Trigger(TriggerError::RootInaccessible { .. })
        ));
        assert!(!h.engine.get_status().await.running);
    }

    #[tokio::test]
    async fn registering_while_running_watches_immediately() {
        let h = harness();
        h.engine.start().await.unwrap();

        let id = h
            .engine
            .register_workflow("late", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();
        let mut rx = h.engine.event_bus().subscribe();

        assert!(h.watcher.fire(id, "/watch/x.pdf").await);
        assert!(matches!(
            next_terminal(&mut rx).await,
            WorkflowEvent::RunCompleted { .. }
        ));
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn stop_does_not_cancel_in_flight_runs() {
        let h = harness();
        let id = h
            .engine
            .register_workflow(
                "slow",
                None,
                TriggerSpec::file_arrival("*.pdf"),
                vec![ActionSpec::new("delay", ActionParams::new().with("ms", 100))],
            )
            .await
            .unwrap();
        let mut rx = h.engine.event_bus().subscribe();

        h.engine.start().await.unwrap();
        assert!(h.watcher.fire(id, "/watch/a.pdf").await);
        loop {
            if let WorkflowEvent::RunStarted { .. } = rx.recv().await.unwrap() {
                break;
            }
        }
        h.engine.stop().await;

        assert!(matches!(
            next_terminal(&mut rx).await,
            WorkflowEvent::RunCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn manual_trigger_runs_without_watcher() {
        let h = harness();
        let id = h
            .engine
            .register_workflow("a", None, TriggerSpec::file_arrival("*.pdf"), notify_actions())
            .await
            .unwrap();

        let outcome = h.engine.trigger(id, Path::new("/tmp/manual.pdf")).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(h.engine.workflow_by_name("a").unwrap().id, id);

        let err = h
            .engine
            .trigger(Uuid::now_v7(), Path::new("/tmp/x.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }
}
