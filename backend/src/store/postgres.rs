// Postgres-backed Store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice_shared::{Activity, Contact, Deal, Notification, Task, User, UserRole};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ContactPatch, Store, StoreError, StoreResult};
use crate::workflows::{
    ExecutionStatus, NewExecution, NewExecutionLog, TriggerType, Workflow, WorkflowAction,
    WorkflowExecution, WorkflowExecutionLog,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Enums are stored as their serde string form ("CONTACT_CREATED",
/// "RUNNING", ...) in plain TEXT columns.
fn enum_str<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

fn enum_from_str<T: DeserializeOwned>(raw: &str, what: &'static str) -> StoreResult<T> {
    serde_json::from_str(&format!("\"{}\"", raw))
        .map_err(|_| StoreError::Corrupt(format!("unrecognized {}: {}", what, raw)))
}

type ExecutionRow = (
    Uuid,                  // id
    Uuid,                  // workflow_id
    Uuid,                  // tenant_id
    String,                // status
    String,                // trigger_type
    String,                // entity_type
    Uuid,                  // entity_id
    Value,                 // trigger_data
    i32,                   // next_action_index
    Option<DateTime<Utc>>, // resume_at
    bool,                  // delay_served
    DateTime<Utc>,         // started_at
    Option<DateTime<Utc>>, // completed_at
    Option<String>,        // error
);

fn execution_from_row(row: ExecutionRow) -> StoreResult<WorkflowExecution> {
    let status: ExecutionStatus = enum_from_str(&row.3, "execution status")?;
    let trigger_type: TriggerType = enum_from_str(&row.4, "trigger type")?;
    Ok(WorkflowExecution {
        id: row.0,
        workflow_id: row.1,
        tenant_id: row.2,
        status,
        trigger_type,
        entity_type: row.5,
        entity_id: row.6,
        trigger_data: row.7,
        next_action_index: row.8,
        resume_at: row.9,
        delay_served: row.10,
        started_at: row.11,
        completed_at: row.12,
        error: row.13,
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, tenant_id, status, trigger_type, entity_type, \
     entity_id, trigger_data, next_action_index, resume_at, delay_served, started_at, \
     completed_at, error";

type UserRow = (Uuid, Uuid, String, String, String, bool, DateTime<Utc>);

fn user_from_row(row: UserRow) -> StoreResult<User> {
    let role: UserRole = enum_from_str(&row.4, "user role")?;
    Ok(User {
        id: row.0,
        tenant_id: row.1,
        name: row.2,
        email: row.3,
        role,
        is_active: row.5,
        created_at: row.6,
    })
}

const USER_COLUMNS: &str = "id, tenant_id, name, email, role, is_active, created_at";

fn role_strings(roles: &[UserRole]) -> Vec<String> {
    roles.iter().map(enum_str).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn active_workflows(
        &self,
        tenant_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, (
            Uuid,
            Uuid,
            String,
            Option<String>,
            String,
            Option<Value>,
            bool,
            String,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        )>(
            r#"
            SELECT id, tenant_id, name, description, trigger_type, conditions,
                   is_active, status, created_at, updated_at
            FROM workflows
            WHERE tenant_id = $1 AND trigger_type = $2
              AND is_active = true AND status = 'ACTIVE'
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(enum_str(&trigger_type))
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let actions = self.workflow_actions(row.0).await?;
            workflows.push(Workflow {
                id: row.0,
                tenant_id: row.1,
                name: row.2,
                description: row.3,
                trigger_type: enum_from_str(&row.4, "trigger type")?,
                conditions: row.5,
                is_active: row.6,
                status: enum_from_str(&row.7, "workflow status")?,
                actions,
                created_at: row.8,
                updated_at: row.9,
            });
        }
        Ok(workflows)
    }

    async fn workflow_actions(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowAction>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, i32, String, String, Value, i32)>(
            r#"
            SELECT id, workflow_id, sort_order, name, action_type, config, delay_minutes
            FROM workflow_actions
            WHERE workflow_id = $1
            ORDER BY sort_order ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowAction {
                id: row.0,
                workflow_id: row.1,
                order: row.2,
                name: row.3,
                action_type: row.4,
                config: row.5,
                delay_minutes: row.6,
            })
            .collect())
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

        sqlx::query(
            r#"
            INSERT INTO workflow_executions
            (id, workflow_id, tenant_id, status, trigger_type, entity_type, entity_id,
             trigger_data, next_action_index, resume_at, delay_served, started_at)
            VALUES ($1, $2, $3, 'RUNNING', $4, $5, $6, $7, 0, NULL, false, $8)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.tenant_id)
        .bind(enum_str(&execution.trigger_type))
        .bind(&execution.entity_type)
        .bind(execution.entity_id)
        .bind(&execution.trigger_data)
        .bind(execution.started_at)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    async fn execution(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        tenant_id: Uuid,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {} FROM workflow_executions
            WHERE tenant_id = $1 AND ($2::uuid IS NULL OR workflow_id = $2)
            ORDER BY started_at DESC
            LIMIT $3
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(tenant_id)
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(execution_from_row).collect()
    }

    async fn complete_execution(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_executions
             SET status = 'COMPLETED', completed_at = NOW(), resume_at = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_execution(&self, id: Uuid, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_executions
             SET status = 'FAILED', error = $2, completed_at = NOW(), resume_at = NULL
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_execution(
        &self,
        id: Uuid,
        next_action_index: i32,
        resume_at: DateTime<Utc>,
        delay_served: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_executions
             SET next_action_index = $2, resume_at = $3, delay_served = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_action_index)
        .bind(resume_at)
        .bind(delay_served)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_execution(&self, id: Uuid) -> StoreResult<bool> {
        // The predicate on resume_at makes the claim atomic; a second
        // scanner matches zero rows
        let result = sqlx::query(
            "UPDATE workflow_executions SET resume_at = NULL
             WHERE id = $1 AND resume_at IS NOT NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_executions(&self, now: DateTime<Utc>) -> StoreResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {} FROM workflow_executions
            WHERE status = 'RUNNING' AND resume_at IS NOT NULL AND resume_at <= $1
            ORDER BY resume_at ASC
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(execution_from_row).collect()
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

        sqlx::query(
            r#"
            INSERT INTO workflow_execution_logs
            (id, execution_id, action_id, action_name, action_type, action_config,
             status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'RUNNING', $7)
            "#,
        )
        .bind(log.id)
        .bind(log.execution_id)
        .bind(log.action_id)
        .bind(&log.action_name)
        .bind(&log.action_type)
        .bind(&log.action_config)
        .bind(log.started_at)
        .execute(&self.pool)
        .await?;

        Ok(log)
    }

    async fn execution_logs(&self, execution_id: Uuid) -> StoreResult<Vec<WorkflowExecutionLog>> {
        let rows = sqlx::query_as::<_, (
            Uuid,
            Uuid,
            Uuid,
            String,
            String,
            Value,
            String,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<Value>,
            Option<String>,
            Option<Value>,
        )>(
            r#"
            SELECT id, execution_id, action_id, action_name, action_type, action_config,
                   status, started_at, completed_at, result, error, error_details
            FROM workflow_execution_logs
            WHERE execution_id = $1
            ORDER BY started_at ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkflowExecutionLog {
                    id: row.0,
                    execution_id: row.1,
                    action_id: row.2,
                    action_name: row.3,
                    action_type: row.4,
                    action_config: row.5,
                    status: enum_from_str(&row.6, "log status")?,
                    started_at: row.7,
                    completed_at: row.8,
                    result: row.9,
                    error: row.10,
                    error_details: row.11,
                })
            })
            .collect()
    }

    async fn complete_execution_log(&self, id: Uuid, result: Value) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_execution_logs
             SET status = 'COMPLETED', result = $2, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_execution_log(&self, id: Uuid, error: &str, details: Value) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_execution_logs
             SET status = 'FAILED', error = $2, error_details = $3, completed_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contact(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, tenant_id, first_name, last_name, email, phone, source, tags,
                   lead_score, stage_id, company_id, assigned_to, created_at, updated_at
            FROM contacts
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn update_contact(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        patch: ContactPatch,
    ) -> StoreResult<Contact> {
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts SET
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                email = COALESCE($5, email),
                phone = COALESCE($6, phone),
                source = COALESCE($7, source),
                stage_id = COALESCE($8, stage_id),
                tags = COALESCE($9, tags),
                lead_score = COALESCE($10, lead_score),
                assigned_to = COALESCE($11, assigned_to),
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING id, tenant_id, first_name, last_name, email, phone, source, tags,
                      lead_score, stage_id, company_id, assigned_to, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(patch.first_name)
        .bind(patch.last_name)
        .bind(patch.email)
        .bind(patch.phone)
        .bind(patch.source)
        .bind(patch.stage_id)
        .bind(patch.tags)
        .bind(patch.lead_score)
        .bind(patch.assigned_to)
        .fetch_optional(&self.pool)
        .await?;

        contact.ok_or(StoreError::NotFound("Contact"))
    }

    async fn contact_count(&self, tenant_id: Uuid) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn active_users_in_roles(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {} FROM users
            WHERE tenant_id = $1 AND is_active = true AND role = ANY($2)
            ORDER BY created_at ASC
            "#,
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(role_strings(roles))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(user_from_row).collect()
    }

    async fn first_active_user(&self, tenant_id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {} FROM users
            WHERE tenant_id = $1 AND is_active = true
            ORDER BY created_at ASC
            LIMIT 1
            "#,
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn least_loaded_user(
        &self,
        tenant_id: Uuid,
        roles: &[UserRole],
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.tenant_id, u.name, u.email, u.role, u.is_active, u.created_at
            FROM users u
            LEFT JOIN contacts c ON c.assigned_to = u.id AND c.tenant_id = u.tenant_id
            WHERE u.tenant_id = $1 AND u.is_active = true AND u.role = ANY($2)
            GROUP BY u.id, u.tenant_id, u.name, u.email, u.role, u.is_active, u.created_at
            ORDER BY COUNT(c.id) ASC, u.created_at ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(role_strings(roles))
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn create_deal(&self, deal: &Deal) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deals
            (id, tenant_id, name, value, stage, probability, description,
             contact_id, company_id, assigned_to, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(deal.id)
        .bind(deal.tenant_id)
        .bind(&deal.name)
        .bind(deal.value)
        .bind(enum_str(&deal.stage))
        .bind(deal.probability)
        .bind(&deal.description)
        .bind(deal.contact_id)
        .bind(deal.company_id)
        .bind(deal.assigned_to)
        .bind(deal.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, tenant_id, title, description, priority, is_completed, due_date,
             assigned_to, assigned_by, contact_id, deal_id, company_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(enum_str(&task.priority))
        .bind(task.is_completed)
        .bind(task.due_date)
        .bind(task.assigned_to)
        .bind(task.assigned_by)
        .bind(task.contact_id)
        .bind(task.deal_id)
        .bind(task.company_id)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_activity(&self, activity: &Activity) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activities
            (id, tenant_id, activity_type, title, description, is_completed,
             completed_at, user_id, contact_id, deal_id, company_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(activity.id)
        .bind(activity.tenant_id)
        .bind(enum_str(&activity.activity_type))
        .bind(&activity.title)
        .bind(&activity.description)
        .bind(activity.is_completed)
        .bind(activity.completed_at)
        .bind(activity.user_id)
        .bind(activity.contact_id)
        .bind(activity.deal_id)
        .bind(activity.company_id)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_notification(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
            (id, tenant_id, user_id, title, message, channel, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id)
        .bind(notification.tenant_id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.channel)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
