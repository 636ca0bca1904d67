// Workflow Executor - Runs individual workflow actions

use chrono::{DateTime, Utc};
use lattice_shared::{Activity, ActivityType, Contact, Deal, DealStage, Task, TaskPriority, UserRole};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::actions::{
    resume_time_after, ActionSpec, AddContactTagConfig, AssignContactConfig, AssignmentRule,
    CreateActivityConfig, CreateDealConfig, CreateTaskConfig, ScoreOperation, SendEmailConfig,
    SendNotificationConfig, UpdateContactConfig, UpdateContactScoreConfig,
    UpdateContactStageConfig, WaitConfig,
};
use super::engine::WorkflowExecution;
use crate::services::{EmailError, EmailSender, NotificationSender, NotifyError};
use crate::store::{ContactPatch, Store, StoreError};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("No contact associated with this execution")]
    NoContact,
    #[error("Contact not found")]
    ContactNotFound(Uuid),
    #[error("Contact email not found")]
    MissingEmail(Uuid),
    #[error("No available user to assign task to")]
    NoAssignableUser,
    #[error("No active user available for activity")]
    NoActiveUser,
    #[error("Invalid action config: {0}")]
    InvalidConfig(String),
    #[error("Email delivery failed: {0}")]
    Email(#[from] EmailError),
    #[error("Notification delivery failed: {0}")]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Context carried across the actions of one execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub trigger_data: Value,
    /// Outputs earlier actions expose to later ones (created record ids)
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution: &WorkflowExecution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            tenant_id: execution.tenant_id,
            entity_type: execution.entity_type.clone(),
            entity_id: execution.entity_id,
            trigger_data: execution.trigger_data.clone(),
            variables: HashMap::new(),
        }
    }

    /// The contact this execution is about: the entity itself for
    /// contact triggers, otherwise the `contactId` carried in the
    /// trigger payload.
    fn contact_id(&self) -> Result<Uuid, ActionError> {
        if self.entity_type == "contact" {
            return Ok(self.entity_id);
        }
        self.trigger_data
            .get("contactId")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(ActionError::NoContact)
    }

    /// Links for records created by actions, based on what triggered
    /// the execution: (contact_id, deal_id, company_id).
    fn entity_links(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        let payload_contact = self
            .trigger_data
            .get("contactId")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());
        match self.entity_type.as_str() {
            "contact" => (Some(self.entity_id), None, None),
            "deal" => (payload_contact, Some(self.entity_id), None),
            "company" => (None, None, Some(self.entity_id)),
            _ => (payload_contact, None, None),
        }
    }
}

/// Result of running one action
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Completed(Value),
    /// The action asked for a suspension longer than the inline
    /// ceiling; the execution parks until `resume_at`.
    Park { output: Value, resume_at: DateTime<Utc> },
}

pub struct ActionExecutor {
    store: Arc<dyn Store>,
    email: Arc<dyn EmailSender>,
    notifier: Arc<dyn NotificationSender>,
    max_inline_wait: Duration,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        email: Arc<dyn EmailSender>,
        notifier: Arc<dyn NotificationSender>,
        max_inline_wait: Duration,
    ) -> Self {
        Self {
            store,
            email,
            notifier,
            max_inline_wait,
        }
    }

    pub async fn execute(
        &self,
        spec: &ActionSpec,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        match spec {
            ActionSpec::UpdateContact(cfg) => self.update_contact(cfg, ctx).await,
            ActionSpec::UpdateContactStage(cfg) => self.update_contact_stage(cfg, ctx).await,
            ActionSpec::AddContactTag(cfg) => self.add_contact_tag(cfg, ctx).await,
            ActionSpec::UpdateContactScore(cfg) => self.update_contact_score(cfg, ctx).await,
            ActionSpec::CreateDeal(cfg) => self.create_deal(cfg, ctx).await,
            ActionSpec::CreateTask(cfg) => self.create_task(cfg, ctx).await,
            ActionSpec::CreateActivity(cfg) => self.create_activity(cfg, ctx).await,
            ActionSpec::AssignContact(cfg) => self.assign_contact(cfg, ctx).await,
            ActionSpec::SendEmail(cfg) => self.send_email(cfg, ctx).await,
            ActionSpec::SendNotification(cfg) => self.send_notification(cfg, ctx).await,
            ActionSpec::Wait(cfg) => self.wait(cfg).await,
            ActionSpec::Unknown { action_type } => {
                info!("Skipping unknown action type '{}'", action_type);
                Ok(ActionOutcome::Completed(json!({
                    "status": "skipped",
                    "reason": "Unknown action type",
                })))
            }
        }
    }

    async fn load_contact(&self, ctx: &ExecutionContext) -> Result<Contact, ActionError> {
        let id = ctx.contact_id()?;
        self.store
            .contact(ctx.tenant_id, id)
            .await?
            .ok_or(ActionError::ContactNotFound(id))
    }

    async fn update_contact(
        &self,
        cfg: &UpdateContactConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;

        let mut patch = ContactPatch::default();
        if let Some(fields) = &cfg.update_fields {
            patch.first_name = fields.first_name.clone();
            patch.last_name = fields.last_name.clone();
            patch.email = fields.email.clone();
            patch.phone = fields.phone.clone();
            patch.source = fields.source.clone();
            patch.stage_id = fields.stage_id;
        }
        if let Some(add) = &cfg.add_tags {
            patch.tags = Some(merge_tags(&contact.tags, add));
        }
        // Direct overwrite; only the score arithmetic action clamps
        if let Some(score) = cfg.lead_score {
            patch.lead_score = Some(score);
        }

        let updated_fields = patch.fields();
        if !patch.is_empty() {
            self.store
                .update_contact(ctx.tenant_id, contact.id, patch)
                .await?;
        }

        Ok(ActionOutcome::Completed(json!({
            "contactId": contact.id,
            "updatedFields": updated_fields,
        })))
    }

    async fn update_contact_stage(
        &self,
        cfg: &UpdateContactStageConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;
        let patch = ContactPatch {
            stage_id: Some(cfg.stage_id),
            ..Default::default()
        };
        self.store
            .update_contact(ctx.tenant_id, contact.id, patch)
            .await?;
        Ok(ActionOutcome::Completed(json!({
            "contactId": contact.id,
            "stageId": cfg.stage_id,
        })))
    }

    async fn add_contact_tag(
        &self,
        cfg: &AddContactTagConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;
        let tags = merge_tags(&contact.tags, std::slice::from_ref(&cfg.tag));
        let added = tags.len() > contact.tags.len();
        if added {
            let patch = ContactPatch {
                tags: Some(tags.clone()),
                ..Default::default()
            };
            self.store
                .update_contact(ctx.tenant_id, contact.id, patch)
                .await?;
        }
        Ok(ActionOutcome::Completed(json!({
            "contactId": contact.id,
            "tag": cfg.tag,
            "added": added,
            "tags": tags,
        })))
    }

    async fn update_contact_score(
        &self,
        cfg: &UpdateContactScoreConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;
        let old_score = contact.lead_score;
        let new_score = match cfg.operation {
            ScoreOperation::Add => old_score + cfg.value.unwrap_or(0),
            ScoreOperation::Subtract => old_score - cfg.value.unwrap_or(0),
            ScoreOperation::Set => cfg.value.unwrap_or(0),
            ScoreOperation::Multiply => old_score * cfg.value.unwrap_or(1),
        };
        // Scores never go negative
        let new_score = new_score.max(0);

        let patch = ContactPatch {
            lead_score: Some(new_score),
            ..Default::default()
        };
        self.store
            .update_contact(ctx.tenant_id, contact.id, patch)
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "contactId": contact.id,
            "oldScore": old_score,
            "newScore": new_score,
        })))
    }

    async fn create_deal(
        &self,
        cfg: &CreateDealConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;

        let name = cfg
            .deal_name
            .clone()
            .unwrap_or_else(|| format!("Opportunity - {}", contact.full_name()));
        let deal = Deal {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: name.clone(),
            value: cfg.estimated_value.unwrap_or(Decimal::ZERO),
            stage: cfg.stage.unwrap_or(DealStage::Prospecting),
            probability: cfg.probability.unwrap_or(0),
            description: Some(
                cfg.description
                    .clone()
                    .unwrap_or_else(|| "Auto-generated from workflow".to_string()),
            ),
            contact_id: Some(contact.id),
            company_id: contact.company_id,
            assigned_to: cfg.assigned_to.or(contact.assigned_to),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.store.create_deal(&deal).await?;
        ctx.variables.insert("dealId".to_string(), json!(deal.id));

        Ok(ActionOutcome::Completed(json!({
            "dealId": deal.id,
            "name": name,
            "contactId": contact.id,
        })))
    }

    async fn create_task(
        &self,
        cfg: &CreateTaskConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let assignee = self
            .store
            .active_users_in_roles(ctx.tenant_id, &UserRole::ASSIGNABLE)
            .await?
            .into_iter()
            .next()
            .ok_or(ActionError::NoAssignableUser)?;

        let assigned_to = cfg.assigned_to.unwrap_or(assignee.id);
        let (contact_id, deal_id, company_id) = ctx.entity_links();
        let task = Task {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            title: cfg
                .title
                .clone()
                .unwrap_or_else(|| "Follow up".to_string()),
            description: cfg.description.clone(),
            priority: cfg.priority.unwrap_or(TaskPriority::Medium),
            is_completed: false,
            due_date: cfg
                .due_in_days
                .map(|days| Utc::now() + chrono::Duration::days(days)),
            assigned_to,
            assigned_by: assignee.id,
            contact_id,
            deal_id,
            company_id,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.create_task(&task).await?;
        ctx.variables.insert("taskId".to_string(), json!(task.id));

        Ok(ActionOutcome::Completed(json!({
            "taskId": task.id,
            "assignedTo": assigned_to,
        })))
    }

    async fn create_activity(
        &self,
        cfg: &CreateActivityConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let user = self
            .store
            .first_active_user(ctx.tenant_id)
            .await?
            .ok_or(ActionError::NoActiveUser)?;

        let (contact_id, deal_id, company_id) = ctx.entity_links();
        let now = Utc::now();
        let activity = Activity {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            activity_type: cfg.activity_type.unwrap_or(ActivityType::Note),
            title: cfg
                .title
                .clone()
                .unwrap_or_else(|| "Workflow activity".to_string()),
            description: cfg.description.clone(),
            // Workflow activities record something that already happened
            is_completed: true,
            completed_at: Some(now),
            user_id: user.id,
            contact_id,
            deal_id,
            company_id,
            created_at: now,
        };
        self.store.create_activity(&activity).await?;
        ctx.variables
            .insert("activityId".to_string(), json!(activity.id));

        Ok(ActionOutcome::Completed(json!({
            "activityId": activity.id,
        })))
    }

    async fn assign_contact(
        &self,
        cfg: &AssignContactConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;

        let assignee = match (cfg.assigned_to, cfg.assignment_rule) {
            (Some(user_id), _) => Some(user_id),
            (None, Some(rule)) => self.resolve_assignee(rule, ctx.tenant_id).await?,
            (None, None) => None,
        };

        // Failing to resolve an owner leaves the contact unassigned
        // rather than failing the execution
        if let Some(user_id) = assignee {
            let patch = ContactPatch {
                assigned_to: Some(user_id),
                ..Default::default()
            };
            self.store
                .update_contact(ctx.tenant_id, contact.id, patch)
                .await?;
        }

        Ok(ActionOutcome::Completed(json!({
            "contactId": contact.id,
            "assignedTo": assignee,
        })))
    }

    async fn resolve_assignee(
        &self,
        rule: AssignmentRule,
        tenant_id: Uuid,
    ) -> Result<Option<Uuid>, ActionError> {
        match rule {
            AssignmentRule::RoundRobin => {
                let users = self
                    .store
                    .active_users_in_roles(tenant_id, &UserRole::ASSIGNABLE)
                    .await?;
                if users.is_empty() {
                    return Ok(None);
                }
                // Approximates a rotation by cycling on the tenant's
                // total contact count
                let count = self.store.contact_count(tenant_id).await?;
                let pick = &users[(count as usize) % users.len()];
                Ok(Some(pick.id))
            }
            AssignmentRule::LoadBalanced => Ok(self
                .store
                .least_loaded_user(tenant_id, &UserRole::ASSIGNABLE)
                .await?
                .map(|u| u.id)),
        }
    }

    async fn send_email(
        &self,
        cfg: &SendEmailConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let contact = self.load_contact(ctx).await?;
        let to = contact
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(ActionError::MissingEmail(contact.id))?;

        let subject = cfg
            .subject
            .clone()
            .unwrap_or_else(|| "Hello from Lattice".to_string());
        let template_id = cfg
            .template_id
            .clone()
            .unwrap_or_else(|| "default".to_string());

        self.email
            .send_templated(to, &subject, &template_id, &ctx.trigger_data)
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "to": to,
            "subject": subject,
            "templateId": template_id,
            "status": "sent",
        })))
    }

    async fn send_notification(
        &self,
        cfg: &SendNotificationConfig,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ActionError> {
        let message = cfg.message.clone().unwrap_or_default();
        let role = cfg
            .recipient_role
            .clone()
            .unwrap_or_else(|| "TENANT_ADMIN".to_string());
        let channels = cfg
            .channels
            .clone()
            .unwrap_or_else(|| vec!["in_app".to_string()]);

        let receipt = self
            .notifier
            .notify_role(ctx.tenant_id, &role, &message, &channels)
            .await?;

        Ok(ActionOutcome::Completed(json!({
            "recipients": receipt.recipients,
            "channels": receipt.channels,
            "message": message,
        })))
    }

    async fn wait(&self, cfg: &WaitConfig) -> Result<ActionOutcome, ActionError> {
        let ms = cfg.delay_ms();
        if ms <= self.max_inline_wait.as_millis() as i64 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            return Ok(ActionOutcome::Completed(json!({ "waitedMs": ms })));
        }

        let resume_at = resume_time_after(Utc::now(), ms);
        Ok(ActionOutcome::Park {
            output: json!({ "waitMs": ms, "resumeAt": resume_at }),
            resume_at,
        })
    }
}

/// Set-union of existing tags and additions, preserving order of first
/// appearance.
fn merge_tags(existing: &[String], additions: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for tag in additions {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}
