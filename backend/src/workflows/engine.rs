// Workflow Engine - Core workflow processing and orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::actions::{ActionSpec, WorkflowAction};
use super::conditions::conditions_match;
use super::executor::{ActionExecutor, ActionOutcome, ExecutionContext};
use super::triggers::{TriggerEvent, TriggerType};
use crate::config::EngineSettings;
use crate::services::{EmailSender, NotificationSender};
use crate::store::{Store, StoreError};

/// Lifecycle state of a workflow definition.
/// Stored as SCREAMING_SNAKE_CASE strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// A stored workflow definition with its ordered actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    /// Raw stored conditions object, evaluated via `TriggerConditions`
    pub conditions: Option<serde_json::Value>,
    pub is_active: bool,
    pub status: WorkflowStatus,
    pub actions: Vec<WorkflowAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Status of an execution or of one of its action logs.
/// Stored as SCREAMING_SNAKE_CASE strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// One run of a workflow against a triggering entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub trigger_data: serde_json::Value,
    /// Index into the workflow's action sequence where a parked
    /// execution resumes.
    pub next_action_index: i32,
    /// Set while the execution is parked on a durable delay.
    pub resume_at: Option<DateTime<Utc>>,
    /// Whether the current park already covers the pre-action delay of
    /// the action at `next_action_index`.
    pub delay_served: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Audit record for one action run within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub action_id: Uuid,
    pub action_name: String,
    pub action_type: String,
    /// Config snapshot taken when the action ran
    pub action_config: serde_json::Value,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

/// Fields needed to open a new execution record
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub trigger_type: TriggerType,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub trigger_data: serde_json::Value,
}

/// Fields needed to open a new action log
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub execution_id: Uuid,
    pub action_id: Uuid,
    pub action_name: String,
    pub action_type: String,
    pub action_config: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a driven action sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Suspended on a durable delay; the resume scanner picks it up.
    Parked,
    /// An action failed; the execution and log records already say so.
    Failed,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    executor: Arc<ActionExecutor>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        email: Arc<dyn EmailSender>,
        notifier: Arc<dyn NotificationSender>,
        settings: &EngineSettings,
    ) -> Self {
        let executor = Arc::new(ActionExecutor::new(
            store.clone(),
            email,
            notifier,
            settings.max_inline_wait,
        ));
        Self { store, executor }
    }

    /// Process a trigger event: start one execution per active matching
    /// workflow of the event's tenant. Action sequences run on spawned
    /// tasks; the returned ids identify executions that were started,
    /// not completed.
    pub async fn process_trigger(&self, event: &TriggerEvent) -> Result<Vec<Uuid>, EngineError> {
        let workflows = self
            .store
            .active_workflows(event.tenant_id, event.trigger_type)
            .await?;

        debug!(
            "{} workflow(s) listening for {:?} in tenant {}",
            workflows.len(),
            event.trigger_type,
            event.tenant_id
        );

        let mut started = Vec::new();
        for workflow in &workflows {
            if let Some(id) = self.start_execution(workflow, event).await? {
                started.push(id);
            }
        }
        Ok(started)
    }

    /// Start one execution of a workflow for an event. Returns `None`
    /// without creating any record when the workflow's conditions
    /// reject the event.
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
    ) -> Result<Option<Uuid>, EngineError> {
        if !conditions_match(workflow.conditions.as_ref(), event) {
            debug!(
                "Workflow '{}' conditions rejected {:?} event for {}",
                workflow.name, event.trigger_type, event.entity_id
            );
            return Ok(None);
        }

        let execution = self
            .store
            .create_execution(NewExecution {
                workflow_id: workflow.id,
                tenant_id: event.tenant_id,
                trigger_type: event.trigger_type,
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id,
                trigger_data: event.data.clone(),
            })
            .await?;

        info!(
            "Starting workflow '{}' (execution {}) for {:?} on {} {}",
            workflow.name, execution.id, event.trigger_type, event.entity_type, event.entity_id
        );

        let engine = self.clone();
        let actions = workflow.actions.clone();
        let workflow_name = workflow.name.clone();
        let execution_id = execution.id;
        tokio::spawn(async move {
            if let Err(e) = engine.run_and_record(&execution, &actions, 0, false).await {
                error!(
                    "Execution {} of workflow '{}' aborted: {}",
                    execution.id, workflow_name, e
                );
            }
        });

        Ok(Some(execution_id))
    }

    /// Continue a parked execution from its recorded position. Actions
    /// are reloaded so edits made to the workflow while parked take
    /// effect. Returns `None` when another scanner claimed the
    /// execution first.
    pub async fn resume_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<Option<RunOutcome>, EngineError> {
        if !self.store.claim_execution(execution.id).await? {
            debug!("Execution {} already claimed; skipping resume", execution.id);
            return Ok(None);
        }
        let actions = self.store.workflow_actions(execution.workflow_id).await?;
        let start = execution.next_action_index.max(0) as usize;
        let skip_first_delay = execution.delay_served;
        self.run_and_record(&execution, &actions, start, skip_first_delay)
            .await
            .map(Some)
    }

    async fn run_and_record(
        &self,
        execution: &WorkflowExecution,
        actions: &[WorkflowAction],
        start_index: usize,
        skip_first_delay: bool,
    ) -> Result<RunOutcome, EngineError> {
        match self
            .run_actions(execution, actions, start_index, skip_first_delay)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Bookkeeping failed mid-run; make sure the record does
                // not stay RUNNING forever
                if let Err(mark) = self.store.fail_execution(execution.id, &e.to_string()).await {
                    error!("Failed to mark execution {} as failed: {}", execution.id, mark);
                }
                Err(e)
            }
        }
    }

    /// Drive the action sequence from `start_index`. Each action gets a
    /// log opened as RUNNING before it runs and settled to exactly one
    /// terminal state after. The first failure marks the execution
    /// FAILED and abandons the remaining actions.
    async fn run_actions(
        &self,
        execution: &WorkflowExecution,
        actions: &[WorkflowAction],
        start_index: usize,
        skip_first_delay: bool,
    ) -> Result<RunOutcome, EngineError> {
        let mut ctx = ExecutionContext::new(execution);
        let mut skip_delay = skip_first_delay;

        for (index, action) in actions.iter().enumerate().skip(start_index) {
            if action.delay_minutes > 0 && !skip_delay {
                let resume_at = Utc::now() + chrono::Duration::minutes(action.delay_minutes as i64);
                self.store
                    .park_execution(execution.id, index as i32, resume_at, true)
                    .await?;
                info!(
                    "Execution {} parked until {} ahead of action '{}'",
                    execution.id, resume_at, action.name
                );
                return Ok(RunOutcome::Parked);
            }
            skip_delay = false;

            let log = self
                .store
                .create_execution_log(NewExecutionLog {
                    execution_id: execution.id,
                    action_id: action.id,
                    action_name: action.name.clone(),
                    action_type: action.action_type.clone(),
                    action_config: action.config.clone(),
                })
                .await?;

            let result = match ActionSpec::parse(action) {
                Ok(spec) => self.executor.execute(&spec, &mut ctx).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(ActionOutcome::Completed(output)) => {
                    self.store.complete_execution_log(log.id, output).await?;
                }
                Ok(ActionOutcome::Park { output, resume_at }) => {
                    self.store.complete_execution_log(log.id, output).await?;
                    self.store
                        .park_execution(execution.id, (index + 1) as i32, resume_at, false)
                        .await?;
                    info!(
                        "Execution {} parked until {} by action '{}'",
                        execution.id, resume_at, action.name
                    );
                    return Ok(RunOutcome::Parked);
                }
                Err(e) => {
                    error!(
                        "Action '{}' of execution {} failed: {}",
                        action.name, execution.id, e
                    );
                    let details = json!({ "error": format!("{:?}", e) });
                    self.store
                        .fail_execution_log(log.id, &e.to_string(), details)
                        .await?;
                    self.store.fail_execution(execution.id, &e.to_string()).await?;
                    return Ok(RunOutcome::Failed);
                }
            }
        }

        self.store.complete_execution(execution.id).await?;
        info!("Execution {} completed", execution.id);
        Ok(RunOutcome::Completed)
    }
}
