// In-memory Store used by the test suite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice_shared::{Activity, Contact, Deal, Notification, Task, User, UserRole};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ContactPatch, Store, StoreError, StoreResult};
use crate::workflows::{
    ExecutionStatus, NewExecution, NewExecutionLog, TriggerType, Workflow, WorkflowAction,
    WorkflowExecution, WorkflowExecutionLog, WorkflowStatus,
};

#[derive(Default)]
struct Tables {
    workflows: Vec<Workflow>,
    executions: Vec<WorkflowExecution>,
    logs: Vec<WorkflowExecutionLog>,
    contacts: Vec<Contact>,
    users: Vec<User>,
    deals: Vec<Deal>,
    tasks: Vec<Task>,
    activities: Vec<Activity>,
    notifications: Vec<Notification>,
}

/// All tables behind one lock; plenty for tests.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- Seeding and inspection helpers -----

    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.inner.write().await.workflows.push(workflow);
    }

    pub async fn insert_contact(&self, contact: Contact) {
        self.inner.write().await.contacts.push(contact);
    }

    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.push(user);
    }

    pub async fn deals(&self) -> Vec<Deal> {
        self.inner.read().await.deals.clone()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.read().await.tasks.clone()
    }

    pub async fn activities(&self) -> Vec<Activity> {
        self.inner.read().await.activities.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.read().await.notifications.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn active_workflows(
        &self,
        tenant_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>> {
        let tables = self.inner.read().await;
        let mut workflows: Vec<Workflow> = tables
            .workflows
            .iter()
            .filter(|w| {
                w.tenant_id == tenant_id
                    && w.trigger_type == trigger_type
                    && w.is_active
                    && w.status == WorkflowStatus::Active
            })
            .cloned()
            .collect();
        for workflow in &mut workflows {
            workflow.actions.sort_by_key(|a| a.order);
        }
        Ok(workflows)
    }

    async fn workflow_actions(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowAction>> {
        let tables = self.inner.read().await;
        let workflow = tables
            .workflows
            .iter()
            .find(|w| w.id == workflow_id)
            .ok_or(StoreError::NotFound("Workflow"))?;
        let mut actions = workflow.actions.clone();
        actions.sort_by_key(|a| a.order);
        Ok(actions)
    }

    async fn create_execution(&self, new: NewExecution) -> StoreResult<WorkflowExecution> {
        let execution = WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            tenant_id: new.tenant_id,
            status: ExecutionStatus::Running,
            trigger_type: new.trigger_type,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            trigger_data: new.trigger_data,
            next_action_index: 0,
            resume_at: None,
            delay_served: false,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        self.inner.write().await.executions.push(execution.clone());
        Ok(execution)
    }

    async fn execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let tables = self.inner.read().await;
        Ok(tables.executions.iter().find(|e| e.id == id).cloned())
    }

    async fn list_executions(
        &self,
        tenant_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let tables = self.inner.read().await;
        let mut executions: Vec<WorkflowExecution> = tables
            .executions
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && workflow_id.map_or(true, |id| e.workflow_id == id)
            })
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn complete_execution(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound("Execution"))?;
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(Utc::now());
        execution.resume_at = None;
        Ok(())
    }

    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound("Execution"))?;
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(error.to_string());
        execution.completed_at = Some(Utc::now());
        execution.resume_at = None;
        Ok(())
    }

    async fn park_execution(
        &self,
        id: Uuid,
        next_action_index: i32,
        resume_at: DateTime<Utc>,
        delay_served: bool,
    ) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound("Execution"))?;
        execution.next_action_index = next_action_index;
        execution.resume_at = Some(resume_at);
        execution.delay_served = delay_served;
        Ok(())
    }

    async fn claim_execution(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound("Execution"))?;
        Ok(execution.resume_at.take().is_some())
    }

    async fn due_executions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowExecution>> {
        let tables = self.inner.read().await;
        Ok(tables
            .executions
            .iter()
            .filter(|e| {
                e.status == ExecutionStatus::Running
                    && e.resume_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn create_execution_log(
        &self,
        new: NewExecutionLog,
    ) -> StoreResult<WorkflowExecutionLog> {
        let log = WorkflowExecutionLog {
            id: Uuid::new_v4(),
            execution_id: new.execution_id,
            action_id: new.action_id,
            action_name: new.action_name,
            action_type: new.action_type,
            action_config: new.action_config,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            error_details: None,
        };
        self.inner.write().await.logs.push(log.clone());
        Ok(log)
    }

    async fn execution_logs(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowExecutionLog>> {
        let tables = self.inner.read().await;
        Ok(tables
            .logs
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn complete_execution_log(&self, id: Uuid, result: Value) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let log = tables
            .logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(StoreError::NotFound("Execution log"))?;
        log.status = ExecutionStatus::Completed;
        log.result = Some(result);
        log.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_execution_log(&self, id: Uuid, error: &str, details: Value) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let log = tables
            .logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or(StoreError::NotFound("Execution log"))?;
        log.status = ExecutionStatus::Failed;
        log.error = Some(error.to_string());
        log.error_details = Some(details);
        log.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn contact(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Contact>> {
        let tables = self.inner.read().await;
        Ok(tables
            .contacts
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.id == id)
            .cloned())
    }

    async fn update_contact(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        patch: ContactPatch,
    ) -> StoreResult<Contact> {
        let mut tables = self.inner.write().await;
        let contact = tables
            .contacts
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.id == id)
            .ok_or(StoreError::NotFound("Contact"))?;
        if let Some(v) = patch.first_name {
            contact.first_name = v;
        }
        if let Some(v) = patch.last_name {
            contact.last_name = v;
        }
        if let Some(v) = patch.email {
            contact.email = Some(v);
        }
        if let Some(v) = patch.phone {
            contact.phone = Some(v);
        }
        if let Some(v) = patch.source {
            contact.source = Some(v);
        }
        if let Some(v) = patch.stage_id {
            contact.stage_id = Some(v);
        }
        if let Some(v) = patch.tags {
            contact.tags = v;
        }
        if let Some(v) = patch.lead_score {
            contact.lead_score = v;
        }
        if let Some(v) = patch.assigned_to {
            contact.assigned_to = Some(v);
        }
        contact.updated_at = Some(Utc::now());
        Ok(contact.clone())
    }

    async fn contact_count(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let tables = self.inner.read().await;
        Ok(tables
            .contacts
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .count() as i64)
    }

    async fn active_users_in_roles(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Vec<User>> {
        let tables = self.inner.read().await;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|u| u.tenant_id == tenant_id && u.is_active && roles.contains(&u.role))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn first_active_user(&self, tenant_id: Uuid) -> StoreResult<Option<User>> {
        let tables = self.inner.read().await;
        let mut users: Vec<User> = tables
            .users
            .iter()
            .filter(|u| u.tenant_id == tenant_id && u.is_active)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users.into_iter().next())
    }

    async fn least_loaded_user(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Option<User>> {
        let tables = self.inner.read().await;
        let mut candidates: Vec<(usize, DateTime<Utc>, User)> = tables
            .users
            .iter()
            .filter(|u| u.tenant_id == tenant_id && u.is_active && roles.contains(&u.role))
            .map(|u| {
                let owned = tables
                    .contacts
                    .iter()
                    .filter(|c| c.tenant_id == tenant_id && c.assigned_to == Some(u.id))
                    .count();
                (owned, u.created_at, u.clone())
            })
            .collect();
        candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Ok(candidates.into_iter().next().map(|(_, _, u)| u))
    }

    async fn create_deal(&self, deal: &Deal) -> StoreResult<()> {
        self.inner.write().await.deals.push(deal.clone());
        Ok(())
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        self.inner.write().await.tasks.push(task.clone());
        Ok(())
    }

    async fn create_activity(&self, activity: &Activity) -> StoreResult<()> {
        self.inner.write().await.activities.push(activity.clone());
        Ok(())
    }

    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }
}
