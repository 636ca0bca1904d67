// Action executor tests: each catalog entry driven directly against
// the in-memory store.

use chrono::Utc;
use lattice_shared::{ActivityType, DealStage, UserRole};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::fixtures;
use super::RecordingEmailSender;
use crate::services::NotificationService;
use crate::store::{MemStore, Store};
use crate::workflows::{ActionError, ActionExecutor, ActionOutcome, ActionSpec, ExecutionContext};

struct Harness {
    tenant_id: Uuid,
    store: Arc<MemStore>,
    email: Arc<RecordingEmailSender>,
    executor: ActionExecutor,
}

impl Harness {
    fn new() -> Self {
        let tenant_id = Uuid::new_v4();
        let store = Arc::new(MemStore::new());
        let email = Arc::new(RecordingEmailSender::default());
        let notifier = Arc::new(NotificationService::new(store.clone()));
        let executor = ActionExecutor::new(
            store.clone(),
            email.clone(),
            notifier,
            Duration::from_millis(50),
        );
        Self {
            tenant_id,
            store,
            email,
            executor,
        }
    }

    fn context_for_contact(&self, contact_id: Uuid) -> ExecutionContext {
        let execution = fixtures::execution(self.tenant_id, "contact", contact_id, json!({}));
        ExecutionContext::new(&execution)
    }

    /// Run one action of the given type and config against a contact
    /// execution, expecting completion.
    async fn run(&self, contact_id: Uuid, action_type: &str, config: Value) -> Value {
        let mut ctx = self.context_for_contact(contact_id);
        let step = fixtures::step(0, "step", action_type, config);
        let spec = ActionSpec::parse(&step).unwrap();
        match self.executor.execute(&spec, &mut ctx).await.unwrap() {
            ActionOutcome::Completed(result) => result,
            ActionOutcome::Park { .. } => panic!("{} unexpectedly parked", action_type),
        }
    }

    async fn run_err(&self, contact_id: Uuid, action_type: &str, config: Value) -> ActionError {
        let mut ctx = self.context_for_contact(contact_id);
        let step = fixtures::step(0, "step", action_type, config);
        let spec = ActionSpec::parse(&step).unwrap();
        match self.executor.execute(&spec, &mut ctx).await {
            Err(e) => e,
            Ok(_) => panic!("{} unexpectedly succeeded", action_type),
        }
    }
}

#[tokio::test]
async fn score_subtract_clamps_at_zero() {
    let h = Harness::new();
    let contact = fixtures::contact_with(h.tenant_id, |c| c.lead_score = 5);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "UPDATE_CONTACT_SCORE",
            json!({ "operation": "subtract", "value": 20 }),
        )
        .await;
    assert_eq!(result["oldScore"], 5);
    assert_eq!(result["newScore"], 0);

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.lead_score, 0);
}

#[tokio::test]
async fn score_multiply_without_value_is_identity() {
    let h = Harness::new();
    let contact = fixtures::contact_with(h.tenant_id, |c| c.lead_score = 7);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "UPDATE_CONTACT_SCORE",
            json!({ "operation": "multiply" }),
        )
        .await;
    assert_eq!(result["newScore"], 7);
}

#[tokio::test]
async fn add_tag_is_idempotent() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let first = h
        .run(contact.id, "ADD_CONTACT_TAG", json!({ "tag": "vip" }))
        .await;
    assert_eq!(first["added"], true);

    let second = h
        .run(contact.id, "ADD_CONTACT_TAG", json!({ "tag": "vip" }))
        .await;
    assert_eq!(second["added"], false);

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.tags, vec!["vip"]);
}

#[tokio::test]
async fn update_contact_merges_fields_tags_and_score() {
    let h = Harness::new();
    let contact = fixtures::contact_with(h.tenant_id, |c| {
        c.tags = vec!["existing".to_string()];
        c.lead_score = 3;
    });
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "UPDATE_CONTACT",
            json!({
                "updateFields": { "source": "import", "phone": "+15550199" },
                "addTags": ["existing", "migrated"],
                "leadScore": 40,
            }),
        )
        .await;
    let fields = result["updatedFields"].as_array().unwrap();
    assert!(fields.contains(&json!("source")));
    assert!(fields.contains(&json!("phone")));

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.source.as_deref(), Some("import"));
    assert_eq!(updated.phone.as_deref(), Some("+15550199"));
    assert_eq!(updated.tags, vec!["existing", "migrated"]);
    assert_eq!(updated.lead_score, 40);
    // Untouched fields survive
    assert_eq!(updated.email.as_deref(), Some("jane.doe@example.com"));
}

#[tokio::test]
async fn update_contact_overwrites_score_without_clamping() {
    let h = Harness::new();
    let contact = fixtures::contact_with(h.tenant_id, |c| c.lead_score = 30);
    h.store.insert_contact(contact.clone()).await;

    h.run(contact.id, "UPDATE_CONTACT", json!({ "leadScore": -5 }))
        .await;

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.lead_score, -5);
}

#[tokio::test]
async fn update_contact_stage_sets_the_stage() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;
    let stage_id = Uuid::new_v4();

    let result = h
        .run(
            contact.id,
            "UPDATE_CONTACT_STAGE",
            json!({ "stageId": stage_id }),
        )
        .await;
    assert_eq!(result["stageId"], json!(stage_id));

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.stage_id, Some(stage_id));
}

#[tokio::test]
async fn create_deal_fills_defaults_from_the_contact() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h.run(contact.id, "CREATE_DEAL", json!({})).await;
    assert_eq!(result["name"], "Opportunity - Jane Doe");

    let deals = h.store.deals().await;
    assert_eq!(deals.len(), 1);
    let deal = &deals[0];
    assert_eq!(deal.value, Decimal::ZERO);
    assert_eq!(deal.stage, DealStage::Prospecting);
    assert_eq!(deal.probability, 0);
    assert_eq!(deal.description.as_deref(), Some("Auto-generated from workflow"));
    assert_eq!(deal.contact_id, Some(contact.id));
}

#[tokio::test]
async fn create_deal_without_contact_fails() {
    let h = Harness::new();
    let missing = Uuid::new_v4();
    let err = h.run_err(missing, "CREATE_DEAL", json!({})).await;
    assert!(matches!(err, ActionError::ContactNotFound(id) if id == missing));
}

#[tokio::test]
async fn create_task_picks_the_earliest_assignable_user() {
    let h = Harness::new();
    // Support is not an assignable role; the earlier of the two
    // assignable users wins
    let support = fixtures::user(h.tenant_id, UserRole::Support);
    let mut manager = fixtures::user(h.tenant_id, UserRole::Manager);
    let mut sales = fixtures::user(h.tenant_id, UserRole::Sales);
    manager.created_at = Utc::now() - chrono::Duration::hours(2);
    sales.created_at = Utc::now() - chrono::Duration::hours(1);
    h.store.insert_user(support).await;
    h.store.insert_user(sales).await;
    h.store.insert_user(manager.clone()).await;

    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(contact.id, "CREATE_TASK", json!({ "title": "Call back" }))
        .await;
    assert_eq!(result["assignedTo"], json!(manager.id));

    let tasks = h.store.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Call back");
    assert_eq!(tasks[0].assigned_to, manager.id);
    assert_eq!(tasks[0].assigned_by, manager.id);
    assert_eq!(tasks[0].contact_id, Some(contact.id));
    assert!(!tasks[0].is_completed);
}

#[tokio::test]
async fn create_task_honors_explicit_assignee() {
    let h = Harness::new();
    let manager = fixtures::user(h.tenant_id, UserRole::Manager);
    h.store.insert_user(manager.clone()).await;
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let target = Uuid::new_v4();
    let result = h
        .run(contact.id, "CREATE_TASK", json!({ "assignedTo": target }))
        .await;
    assert_eq!(result["assignedTo"], json!(target));

    let tasks = h.store.tasks().await;
    assert_eq!(tasks[0].assigned_to, target);
    // The resolved user still stands as the creator
    assert_eq!(tasks[0].assigned_by, manager.id);
}

#[tokio::test]
async fn create_task_with_no_assignable_user_fails() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let err = h.run_err(contact.id, "CREATE_TASK", json!({})).await;
    assert!(matches!(err, ActionError::NoAssignableUser));
    assert!(h.store.tasks().await.is_empty());
}

#[tokio::test]
async fn create_activity_is_recorded_as_already_done() {
    let h = Harness::new();
    let user = fixtures::user(h.tenant_id, UserRole::Sales);
    h.store.insert_user(user.clone()).await;
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    h.run(
        contact.id,
        "CREATE_ACTIVITY",
        json!({ "type": "CALL", "title": "Welcome call" }),
    )
    .await;

    let activities = h.store.activities().await;
    assert_eq!(activities.len(), 1);
    let activity = &activities[0];
    assert_eq!(activity.activity_type, ActivityType::Call);
    assert_eq!(activity.title, "Welcome call");
    assert!(activity.is_completed);
    assert!(activity.completed_at.is_some());
    assert_eq!(activity.user_id, user.id);
    assert_eq!(activity.contact_id, Some(contact.id));
}

#[tokio::test]
async fn create_activity_without_any_user_fails() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let err = h.run_err(contact.id, "CREATE_ACTIVITY", json!({})).await;
    assert!(matches!(err, ActionError::NoActiveUser));
}

#[tokio::test]
async fn assign_contact_round_robin_cycles_on_contact_count() {
    let h = Harness::new();
    let mut first = fixtures::user(h.tenant_id, UserRole::Sales);
    let mut second = fixtures::user(h.tenant_id, UserRole::Sales);
    first.created_at = Utc::now() - chrono::Duration::hours(2);
    second.created_at = Utc::now() - chrono::Duration::hours(1);
    h.store.insert_user(first.clone()).await;
    h.store.insert_user(second.clone()).await;

    // One contact in the tenant, so count % 2 picks the second user
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "ASSIGN_CONTACT",
            json!({ "assignmentRule": "round-robin" }),
        )
        .await;
    assert_eq!(result["assignedTo"], json!(second.id));

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.assigned_to, Some(second.id));
}

#[tokio::test]
async fn assign_contact_load_balanced_picks_least_owned() {
    let h = Harness::new();
    let busy = fixtures::user(h.tenant_id, UserRole::Sales);
    let idle = fixtures::user(h.tenant_id, UserRole::Sales);
    h.store.insert_user(busy.clone()).await;
    h.store.insert_user(idle.clone()).await;

    let owned = fixtures::contact_with(h.tenant_id, |c| c.assigned_to = Some(busy.id));
    h.store.insert_contact(owned).await;
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "ASSIGN_CONTACT",
            json!({ "assignmentRule": "load-balanced" }),
        )
        .await;
    assert_eq!(result["assignedTo"], json!(idle.id));
}

#[tokio::test]
async fn assign_contact_without_candidates_leaves_unassigned() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "ASSIGN_CONTACT",
            json!({ "assignmentRule": "round-robin" }),
        )
        .await;
    assert_eq!(result["assignedTo"], Value::Null);

    let updated = h.store.contact(h.tenant_id, contact.id).await.unwrap().unwrap();
    assert_eq!(updated.assigned_to, None);
}

#[tokio::test]
async fn send_email_requires_a_contact_email() {
    let h = Harness::new();
    let contact = fixtures::contact_with(h.tenant_id, |c| c.email = None);
    h.store.insert_contact(contact.clone()).await;

    let err = h.run_err(contact.id, "SEND_EMAIL", json!({})).await;
    assert!(matches!(err, ActionError::MissingEmail(id) if id == contact.id));
    assert!(h.email.sent.lock().await.is_empty());
}

#[tokio::test]
async fn send_email_uses_defaults_and_records_delivery() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h.run(contact.id, "SEND_EMAIL", json!({})).await;
    assert_eq!(result["status"], "sent");
    assert_eq!(result["to"], "jane.doe@example.com");

    let sent = h.email.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane.doe@example.com");
    assert_eq!(sent[0].subject, "Hello from Lattice");
    assert_eq!(sent[0].template_id, "default");
}

#[tokio::test]
async fn send_email_surfaces_delivery_failures() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;
    h.email
        .fail_next
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = h.run_err(contact.id, "SEND_EMAIL", json!({})).await;
    assert!(matches!(err, ActionError::Email(_)));
}

#[tokio::test]
async fn send_notification_reaches_every_role_holder() {
    let h = Harness::new();
    let admin_a = fixtures::user(h.tenant_id, UserRole::TenantAdmin);
    let admin_b = fixtures::user(h.tenant_id, UserRole::TenantAdmin);
    let sales = fixtures::user(h.tenant_id, UserRole::Sales);
    h.store.insert_user(admin_a.clone()).await;
    h.store.insert_user(admin_b.clone()).await;
    h.store.insert_user(sales).await;
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "SEND_NOTIFICATION",
            json!({ "message": "Heads up" }),
        )
        .await;
    assert_eq!(result["recipients"], 2);
    assert_eq!(result["message"], "Heads up");

    let notifications = h.store.notifications().await;
    assert_eq!(notifications.len(), 2);
    let recipients: Vec<Uuid> = notifications.iter().map(|n| n.user_id).collect();
    assert!(recipients.contains(&admin_a.id));
    assert!(recipients.contains(&admin_b.id));
    assert!(notifications.iter().all(|n| n.message == "Heads up"));
}

#[tokio::test]
async fn send_notification_to_unknown_role_reaches_nobody() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(
            contact.id,
            "SEND_NOTIFICATION",
            json!({ "message": "x", "recipientRole": "ASTRONAUT" }),
        )
        .await;
    assert_eq!(result["recipients"], 0);
    assert!(h.store.notifications().await.is_empty());
}

#[tokio::test]
async fn zero_wait_completes_inline() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let result = h
        .run(contact.id, "WAIT", json!({ "delay": 0, "unit": "minutes" }))
        .await;
    assert_eq!(result["waitedMs"], 0);
}

#[tokio::test]
async fn long_wait_parks_with_a_future_resume_time() {
    let h = Harness::new();
    let contact = fixtures::contact(h.tenant_id);
    h.store.insert_contact(contact.clone()).await;

    let mut ctx = h.context_for_contact(contact.id);
    let step = fixtures::step(0, "wait", "WAIT", json!({ "delay": 1, "unit": "minutes" }));
    let spec = ActionSpec::parse(&step).unwrap();
    let before = Utc::now();
    match h.executor.execute(&spec, &mut ctx).await.unwrap() {
        ActionOutcome::Park { output, resume_at } => {
            assert_eq!(output["waitMs"], 60_000);
            let lower = before + chrono::Duration::seconds(59);
            let upper = Utc::now() + chrono::Duration::seconds(61);
            assert!(resume_at >= lower && resume_at <= upper);
        }
        ActionOutcome::Completed(_) => panic!("one-minute wait should park"),
    }
}
