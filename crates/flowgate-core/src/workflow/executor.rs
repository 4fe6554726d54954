//! Pipeline executor: runs one workflow's actions against one resource.
//!
//! # Execution flow
//!
//! 1. Publish `RunStarted`; `current` starts as the trigger resource.
//! 2. For each action, in order:
//!    - resolve through the registry, falling back to the built-in contract
//!      for built-in kinds; an unknown custom kind is logged and skipped
//!    - if the workflow has an owner, authorize through the access gate
//!    - invoke with `(current, params)`; a produced resource replaces
//!      `current` for kinds that produce one
//!    - on success, charge the held usage permit
//! 3. The first failure stops the run and publishes `RunFailed`; nothing
//!    already done is rolled back. Otherwise publish `RunCompleted`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use flowgate_types::event::WorkflowEvent;
use flowgate_types::workflow::{ActionSpec, RunOutcome, RunStatus, WorkflowDefinition};
use uuid::Uuid;

use crate::event::EventBus;
use crate::quota::{AccessGate, Authorization, InMemoryUsageStore, UsagePermit, UsageStore};

use super::actions::BuiltinActions;
use super::registry::{ActionError, ActionRegistry};

/// What happened to a single action.
enum StepResult {
    Done(Option<PathBuf>),
    Skipped,
}

/// Runs workflow pipelines. Cheap to share behind an `Arc`; runs hold no
/// state on the executor, so any number may execute concurrently.
pub struct PipelineExecutor<S: UsageStore = InMemoryUsageStore> {
    registry: Arc<ActionRegistry>,
    builtins: BuiltinActions,
    gate: Option<Arc<AccessGate<S>>>,
    event_bus: EventBus,
}

impl<S: UsageStore> PipelineExecutor<S> {
    /// An ungated executor.
    pub fn new(registry: Arc<ActionRegistry>, builtins: BuiltinActions, event_bus: EventBus) -> Self {
        Self {
            registry,
            builtins,
            gate: None,
            event_bus,
        }
    }

    /// Gate actions of owned workflows through `gate`.
    pub fn with_gate(mut self, gate: Arc<AccessGate<S>>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Run `workflow` against `trigger_resource` to completion or first failure.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        trigger_resource: &Path,
    ) -> RunOutcome {
        let run_id = Uuid::now_v7();
        let started = Instant::now();

        self.event_bus.publish(WorkflowEvent::RunStarted {
            run_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            resource: trigger_resource.to_path_buf(),
        });
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            resource = %trigger_resource.display(),
            actions = workflow.actions.len(),
            "pipeline run started"
        );

        let mut current = trigger_resource.to_path_buf();
        let mut completed = 0usize;
        let mut skipped = 0usize;

        for (index, spec) in workflow.actions.iter().enumerate() {
            let action_started = Instant::now();

            match self.run_action(workflow, spec, &current).await {
                Ok(StepResult::Done(produced)) => {
                    if let Some(next) = produced.filter(|_| spec.kind.produces_resource()) {
                        current = next;
                    }
                    completed += 1;

                    let duration_ms = action_started.elapsed().as_millis() as u64;
                    tracing::debug!(
                        run_id = %run_id,
                        action_index = index,
                        action_kind = spec.kind.as_str(),
                        resource = %current.display(),
                        duration_ms,
                        "action completed"
                    );
                    self.event_bus.publish(WorkflowEvent::ActionCompleted {
                        run_id,
                        action_index: index,
                        action_kind: spec.kind.to_string(),
                        resource: current.clone(),
                        duration_ms,
                    });
                }
                Ok(StepResult::Skipped) => {
                    skipped += 1;
                    self.event_bus.publish(WorkflowEvent::ActionSkipped {
                        run_id,
                        action_index: index,
                        action_kind: spec.kind.to_string(),
                    });
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(
                        run_id = %run_id,
                        workflow = workflow.name.as_str(),
                        action_index = index,
                        action_kind = spec.kind.as_str(),
                        error = %reason,
                        "pipeline run failed"
                    );
                    self.event_bus.publish(WorkflowEvent::RunFailed {
                        run_id,
                        workflow_name: workflow.name.clone(),
                        trigger_resource: trigger_resource.to_path_buf(),
                        action_index: index,
                        action_kind: spec.kind.to_string(),
                        error: reason.clone(),
                    });

                    return RunOutcome {
                        run_id,
                        workflow_id: workflow.id,
                        workflow_name: workflow.name.clone(),
                        trigger_resource: trigger_resource.to_path_buf(),
                        final_resource: current,
                        actions_completed: completed,
                        actions_skipped: skipped,
                        status: RunStatus::Failed {
                            action_index: index,
                            action_kind: spec.kind.to_string(),
                            reason,
                        },
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            completed,
            skipped,
            duration_ms,
            "pipeline run completed"
        );
        self.event_bus.publish(WorkflowEvent::RunCompleted {
            run_id,
            workflow_name: workflow.name.clone(),
            trigger_resource: trigger_resource.to_path_buf(),
            actions_completed: completed as u32,
            duration_ms,
        });

        RunOutcome {
            run_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            trigger_resource: trigger_resource.to_path_buf(),
            final_resource: current,
            actions_completed: completed,
            actions_skipped: skipped,
            status: RunStatus::Completed,
            duration_ms,
        }
    }

    async fn run_action(
        &self,
        workflow: &WorkflowDefinition,
        spec: &ActionSpec,
        resource: &Path,
    ) -> Result<StepResult, ActionError> {
        let implementation = self.registry.lookup(spec.kind.as_str());
        if implementation.is_none() && !spec.kind.is_builtin() {
            tracing::warn!(
                workflow = workflow.name.as_str(),
                action_kind = spec.kind.as_str(),
                "no implementation registered for action kind, skipping"
            );
            return Ok(StepResult::Skipped);
        }

        let permit = self.authorize(workflow, spec).await?;

        let produced = match implementation {
            Some(action) => action.invoke(resource, &spec.params).await?,
            None => self.builtins.invoke(&spec.kind, resource, &spec.params).await?,
        };

        if let Some(permit) = permit {
            let identity = permit.identity().to_string();
            if let Err(e) = permit.commit().await {
                tracing::warn!(
                    identity = identity.as_str(),
                    action_kind = spec.kind.as_str(),
                    error = %e,
                    "action succeeded but usage could not be recorded"
                );
            }
        }

        Ok(StepResult::Done(produced))
    }

    /// Take a usage permit for a gated action of an owned workflow.
    ///
    /// Returns `None` when the action runs ungated.
    async fn authorize(
        &self,
        workflow: &WorkflowDefinition,
        spec: &ActionSpec,
    ) -> Result<Option<UsagePermit<S>>, ActionError> {
        let (Some(gate), Some(owner)) = (&self.gate, &workflow.owner) else {
            return Ok(None);
        };
        if !spec.kind.is_gated() {
            return Ok(None);
        }

        match gate
            .authorize(owner, spec.gate_key())
            .await
            .map_err(|e| ActionError::Quota(e.to_string()))?
        {
            Authorization::Granted(permit) => Ok(Some(permit)),
            Authorization::Denied(denial) => Err(ActionError::AccessDenied(denial)),
        }
    }
}

impl<S: UsageStore> std::fmt::Debug for PipelineExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("registry", &self.registry)
            .field("builtins", &self.builtins)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}
