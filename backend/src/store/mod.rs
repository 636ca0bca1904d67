// Persistence port for the workflow engine
//
// All reads and writes the engine performs go through the `Store`
// trait so the orchestrator and action executor stay independent of
// the backing database. `PgStore` is the production implementation,
// `MemStore` backs the test suite.

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice_shared::{Activity, Contact, Deal, Notification, Task, User, UserRole};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::workflows::{
    NewExecution, NewExecutionLog, TriggerType, Workflow, WorkflowAction, WorkflowExecution,
    WorkflowExecutionLog,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial update of a contact. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub stage_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub lead_score: Option<i32>,
    pub assigned_to: Option<Uuid>,
}

impl ContactPatch {
    /// Names of the fields this patch sets, for result payloads.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.first_name.is_some() {
            fields.push("firstName");
        }
        if self.last_name.is_some() {
            fields.push("lastName");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.phone.is_some() {
            fields.push("phone");
        }
        if self.source.is_some() {
            fields.push("source");
        }
        if self.stage_id.is_some() {
            fields.push("stageId");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.lead_score.is_some() {
            fields.push("leadScore");
        }
        if self.assigned_to.is_some() {
            fields.push("assignedTo");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // ----- Workflows -----

    /// Active workflows of a tenant listening for the given trigger,
    /// with their actions loaded in execution order.
    async fn active_workflows(
        &self,
        tenant_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>>;

    /// Current actions of a workflow in execution order.
    async fn workflow_actions(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowAction>>;

    // ----- Executions -----

    async fn create_execution(&self, new: NewExecution) -> StoreResult<WorkflowExecution>;
    async fn execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;
    async fn list_executions(
        &self,
        tenant_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>>;
    async fn complete_execution(&self, id: Uuid) -> StoreResult<()>;
    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()>;

    /// Suspend a running execution until `resume_at`, recording where
    /// the action sequence picks back up. `delay_served` marks whether
    /// this park already covers the pre-action delay of the action at
    /// `next_action_index`.
    async fn park_execution(
        &self,
        id: Uuid,
        next_action_index: i32,
        resume_at: DateTime<Utc>,
        delay_served: bool,
    ) -> StoreResult<()>;

    /// Claim a parked execution by clearing its resume marker. Returns
    /// false when the marker was already gone, so concurrent scanners
    /// cannot resume the same execution twice.
    async fn claim_execution(&self, id: Uuid) -> StoreResult<bool>;

    /// Parked executions whose resume time has passed.
    async fn due_executions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowExecution>>;

    // ----- Execution logs -----

    async fn create_execution_log(
        &self,
        new: NewExecutionLog,
    ) -> StoreResult<WorkflowExecutionLog>;
    async fn execution_logs(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowExecutionLog>>;
    async fn complete_execution_log(&self, id: Uuid, result: Value) -> StoreResult<()>;
    async fn fail_execution_log(&self, id: Uuid, error: &str, details: Value) -> StoreResult<()>;

    // ----- Contacts -----

    async fn contact(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Contact>>;
    async fn update_contact(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        patch: ContactPatch,
    ) -> StoreResult<Contact>;
    async fn contact_count(&self, tenant_id: Uuid) -> StoreResult<i64>;

    // ----- Users -----

    /// Active users holding any of the given roles, oldest account first.
    async fn active_users_in_roles(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Vec<User>>;
    async fn first_active_user(&self, tenant_id: Uuid) -> StoreResult<Option<User>>;

    /// Among active users in the given roles, the one owning the fewest
    /// contacts.
    async fn least_loaded_user(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Option<User>>;

    // ----- Records created by actions -----

    async fn create_deal(&self, deal: &Deal) -> StoreResult<()>;
    async fn create_task(&self, task: &Task) -> StoreResult<()>;
    async fn create_activity(&self, activity: &Activity) -> StoreResult<()>;
    async fn create_notification(&self, notification: &Notification) -> StoreResult<()>;
}
