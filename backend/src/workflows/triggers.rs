// Workflow Triggers - Event types that can trigger workflow execution

use lattice_shared::{Activity, Company, Contact, Deal, DealStage, Task};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use super::engine::{EngineError, WorkflowEngine};

/// Minimum absolute lead-score delta that fires a CONTACT_SCORE_CHANGED event.
pub const SCORE_CHANGE_THRESHOLD: i32 = 10;

/// Types of events that can trigger workflows.
/// Stored as SCREAMING_SNAKE_CASE strings in the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    // Contact triggers
    ContactCreated,
    ContactUpdated,
    ContactStageChanged,
    ContactScoreChanged,

    // Deal triggers
    DealCreated,
    DealUpdated,
    DealStageChanged,
    DealWon,
    DealLost,

    // Company triggers
    CompanyCreated,

    // Work item triggers
    TaskCompleted,
    ActivityCompleted,

    // Inbound channel triggers
    FormSubmitted,
    WhatsappMessageReceived,
    EmailOpened,
}

/// A trigger event that can initiate workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    pub tenant_id: Uuid,
    /// Primary entity the event is about.
    pub entity_id: Uuid,
    /// Kind of the primary entity ("contact", "deal", "company", ...).
    pub entity_type: String,
    /// Event payload, also recorded as the execution's trigger data.
    pub data: serde_json::Value,
    /// User whose action caused the event, when known.
    pub user_id: Option<Uuid>,
}

impl TriggerEvent {
    pub fn new(
        trigger_type: TriggerType,
        tenant_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
        data: serde_json::Value,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            trigger_type,
            tenant_id,
            entity_id,
            entity_type: entity_type.to_string(),
            data,
            user_id,
        }
    }

    pub fn contact_created(contact: &Contact, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::ContactCreated,
            contact.tenant_id,
            contact.id,
            "contact",
            json!({
                "contactId": contact.id,
                "firstName": contact.first_name,
                "lastName": contact.last_name,
                "email": contact.email,
                "phone": contact.phone,
                "source": contact.source,
                "tags": contact.tags,
                "leadScore": contact.lead_score,
            }),
            user_id,
        )
    }

    pub fn contact_updated(old: &Contact, new: &Contact, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::ContactUpdated,
            new.tenant_id,
            new.id,
            "contact",
            json!({
                "contactId": new.id,
                "source": new.source,
                "tags": new.tags,
                "leadScore": new.lead_score,
                "changedFields": contact_changed_fields(old, new),
            }),
            user_id,
        )
    }

    pub fn contact_stage_changed(old: &Contact, new: &Contact, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::ContactStageChanged,
            new.tenant_id,
            new.id,
            "contact",
            json!({
                "contactId": new.id,
                "source": new.source,
                "tags": new.tags,
                "oldStageId": old.stage_id,
                "newStageId": new.stage_id,
            }),
            user_id,
        )
    }

    pub fn contact_score_changed(old: &Contact, new: &Contact, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::ContactScoreChanged,
            new.tenant_id,
            new.id,
            "contact",
            json!({
                "contactId": new.id,
                "source": new.source,
                "tags": new.tags,
                "oldScore": old.lead_score,
                "newScore": new.lead_score,
                "delta": new.lead_score - old.lead_score,
            }),
            user_id,
        )
    }

    pub fn deal_created(deal: &Deal, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::DealCreated,
            deal.tenant_id,
            deal.id,
            "deal",
            deal_payload(deal),
            user_id,
        )
    }

    pub fn deal_updated(old: &Deal, new: &Deal, user_id: Option<Uuid>) -> Self {
        let mut data = deal_payload(new);
        data["changedFields"] = json!(deal_changed_fields(old, new));
        Self::new(TriggerType::DealUpdated, new.tenant_id, new.id, "deal", data, user_id)
    }

    pub fn deal_stage_changed(old: &Deal, new: &Deal, user_id: Option<Uuid>) -> Self {
        let mut data = deal_payload(new);
        data["oldStage"] = json!(old.stage);
        data["newStage"] = json!(new.stage);
        Self::new(TriggerType::DealStageChanged, new.tenant_id, new.id, "deal", data, user_id)
    }

    pub fn deal_won(deal: &Deal, user_id: Option<Uuid>) -> Self {
        Self::new(TriggerType::DealWon, deal.tenant_id, deal.id, "deal", deal_payload(deal), user_id)
    }

    pub fn deal_lost(deal: &Deal, user_id: Option<Uuid>) -> Self {
        Self::new(TriggerType::DealLost, deal.tenant_id, deal.id, "deal", deal_payload(deal), user_id)
    }

    pub fn company_created(company: &Company, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::CompanyCreated,
            company.tenant_id,
            company.id,
            "company",
            json!({
                "companyId": company.id,
                "name": company.name,
                "industry": company.industry,
            }),
            user_id,
        )
    }

    pub fn task_completed(task: &Task, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::TaskCompleted,
            task.tenant_id,
            task.id,
            "task",
            json!({
                "taskId": task.id,
                "title": task.title,
                "contactId": task.contact_id,
                "dealId": task.deal_id,
                "assignedTo": task.assigned_to,
            }),
            user_id,
        )
    }

    pub fn activity_completed(activity: &Activity, user_id: Option<Uuid>) -> Self {
        Self::new(
            TriggerType::ActivityCompleted,
            activity.tenant_id,
            activity.id,
            "activity",
            json!({
                "activityId": activity.id,
                "type": activity.activity_type,
                "title": activity.title,
                "contactId": activity.contact_id,
                "dealId": activity.deal_id,
            }),
            user_id,
        )
    }

    pub fn form_submitted(
        tenant_id: Uuid,
        submission_id: Uuid,
        form_id: &str,
        contact_id: Option<Uuid>,
        fields: serde_json::Value,
    ) -> Self {
        Self::new(
            TriggerType::FormSubmitted,
            tenant_id,
            submission_id,
            "form_submission",
            json!({
                "submissionId": submission_id,
                "formId": form_id,
                "contactId": contact_id,
                "fields": fields,
            }),
            None,
        )
    }

    pub fn whatsapp_message_received(
        tenant_id: Uuid,
        message_id: Uuid,
        phone_number: &str,
        message_text: &str,
        contact_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            TriggerType::WhatsappMessageReceived,
            tenant_id,
            message_id,
            "whatsapp_message",
            json!({
                "messageId": message_id,
                "phoneNumber": phone_number,
                "messageText": message_text,
                "contactId": contact_id,
            }),
            None,
        )
    }

    pub fn email_opened(
        tenant_id: Uuid,
        email_id: Uuid,
        campaign_id: Option<&str>,
        contact_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            TriggerType::EmailOpened,
            tenant_id,
            email_id,
            "email",
            json!({
                "emailId": email_id,
                "campaignId": campaign_id,
                "contactId": contact_id,
            }),
            None,
        )
    }
}

fn deal_payload(deal: &Deal) -> serde_json::Value {
    json!({
        "dealId": deal.id,
        "name": deal.name,
        "value": deal.value,
        "stage": deal.stage,
        "probability": deal.probability,
        "contactId": deal.contact_id,
    })
}

/// Names of contact fields that differ between the two snapshots.
pub fn contact_changed_fields(old: &Contact, new: &Contact) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.first_name != new.first_name {
        changed.push("firstName");
    }
    if old.last_name != new.last_name {
        changed.push("lastName");
    }
    if old.email != new.email {
        changed.push("email");
    }
    if old.phone != new.phone {
        changed.push("phone");
    }
    if old.source != new.source {
        changed.push("source");
    }
    if old.tags != new.tags {
        changed.push("tags");
    }
    if old.lead_score != new.lead_score {
        changed.push("leadScore");
    }
    if old.stage_id != new.stage_id {
        changed.push("stageId");
    }
    if old.assigned_to != new.assigned_to {
        changed.push("assignedTo");
    }
    changed
}

fn deal_changed_fields(old: &Deal, new: &Deal) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.name != new.name {
        changed.push("name");
    }
    if old.value != new.value {
        changed.push("value");
    }
    if old.stage != new.stage {
        changed.push("stage");
    }
    if old.probability != new.probability {
        changed.push("probability");
    }
    if old.assigned_to != new.assigned_to {
        changed.push("assignedTo");
    }
    changed
}

/// Adapter that observes CRM mutations and dispatches trigger events
/// into the workflow engine. Mutation handlers compare before/after
/// snapshots and synthesize the more specific events (stage changed,
/// score changed, deal won/lost) alongside the generic update event.
#[derive(Clone)]
pub struct WorkflowTriggers {
    engine: WorkflowEngine,
}

impl WorkflowTriggers {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    pub async fn on_contact_created(
        &self,
        contact: &Contact,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        self.engine
            .process_trigger(&TriggerEvent::contact_created(contact, user_id))
            .await
    }

    pub async fn on_contact_updated(
        &self,
        old: &Contact,
        new: &Contact,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let mut started = Vec::new();

        if old.stage_id != new.stage_id {
            let event = TriggerEvent::contact_stage_changed(old, new, user_id);
            started.extend(self.dispatch(&event).await);
        }

        if (new.lead_score - old.lead_score).abs() >= SCORE_CHANGE_THRESHOLD {
            let event = TriggerEvent::contact_score_changed(old, new, user_id);
            started.extend(self.dispatch(&event).await);
        }

        let event = TriggerEvent::contact_updated(old, new, user_id);
        started.extend(self.dispatch(&event).await);

        Ok(started)
    }

    pub async fn on_deal_created(
        &self,
        deal: &Deal,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        self.engine
            .process_trigger(&TriggerEvent::deal_created(deal, user_id))
            .await
    }

    pub async fn on_deal_updated(
        &self,
        old: &Deal,
        new: &Deal,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let mut started = Vec::new();

        if old.stage != new.stage {
            let event = TriggerEvent::deal_stage_changed(old, new, user_id);
            started.extend(self.dispatch(&event).await);

            // Won/lost fire only on the first transition into a closed stage
            if new.stage == DealStage::ClosedWon && old.stage != DealStage::ClosedWon {
                let event = TriggerEvent::deal_won(new, user_id);
                started.extend(self.dispatch(&event).await);
            }
            if new.stage == DealStage::ClosedLost && old.stage != DealStage::ClosedLost {
                let event = TriggerEvent::deal_lost(new, user_id);
                started.extend(self.dispatch(&event).await);
            }
        }

        let event = TriggerEvent::deal_updated(old, new, user_id);
        started.extend(self.dispatch(&event).await);

        Ok(started)
    }

    pub async fn on_company_created(
        &self,
        company: &Company,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        self.engine
            .process_trigger(&TriggerEvent::company_created(company, user_id))
            .await
    }

    pub async fn on_task_completed(
        &self,
        task: &Task,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        self.engine
            .process_trigger(&TriggerEvent::task_completed(task, user_id))
            .await
    }

    pub async fn on_activity_completed(
        &self,
        activity: &Activity,
        user_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        self.engine
            .process_trigger(&TriggerEvent::activity_completed(activity, user_id))
            .await
    }

    pub async fn on_form_submitted(
        &self,
        tenant_id: Uuid,
        submission_id: Uuid,
        form_id: &str,
        contact_id: Option<Uuid>,
        fields: serde_json::Value,
    ) -> Result<Vec<Uuid>, EngineError> {
        let event =
            TriggerEvent::form_submitted(tenant_id, submission_id, form_id, contact_id, fields);
        self.engine.process_trigger(&event).await
    }

    pub async fn on_whatsapp_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        phone_number: &str,
        message_text: &str,
        contact_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let event = TriggerEvent::whatsapp_message_received(
            tenant_id,
            message_id,
            phone_number,
            message_text,
            contact_id,
        );
        self.engine.process_trigger(&event).await
    }

    pub async fn on_email_opened(
        &self,
        tenant_id: Uuid,
        email_id: Uuid,
        campaign_id: Option<&str>,
        contact_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, EngineError> {
        let event = TriggerEvent::email_opened(tenant_id, email_id, campaign_id, contact_id);
        self.engine.process_trigger(&event).await
    }

    /// One synthesized sub-event failing to dispatch must not stop the
    /// remaining sub-events for the same mutation.
    async fn dispatch(&self, event: &TriggerEvent) -> Vec<Uuid> {
        match self.engine.process_trigger(event).await {
            Ok(started) => started,
            Err(e) => {
                error!("Failed to process {:?} trigger: {}", event.trigger_type, e);
                Vec::new()
            }
        }
    }
}
