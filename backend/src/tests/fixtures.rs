// Test fixtures for CRM entities and workflow definitions

use chrono::Utc;
use lattice_shared::{Contact, User, UserRole};
use serde_json::Value;
use uuid::Uuid;

use crate::workflows::{
    ExecutionStatus, TriggerType, Workflow, WorkflowAction, WorkflowExecution, WorkflowStatus,
};

pub fn contact(tenant_id: Uuid) -> Contact {
    Contact {
        id: Uuid::new_v4(),
        tenant_id,
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: Some("jane.doe@example.com".to_string()),
        phone: Some("+15550100".to_string()),
        source: Some("form".to_string()),
        tags: vec![],
        lead_score: 0,
        stage_id: None,
        company_id: None,
        assigned_to: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

pub fn contact_with(tenant_id: Uuid, build: impl FnOnce(&mut Contact)) -> Contact {
    let mut c = contact(tenant_id);
    build(&mut c);
    c
}

pub fn user(tenant_id: Uuid, role: UserRole) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        tenant_id,
        name: format!("User {}", &id.to_string()[..8]),
        email: format!("{}@example.com", &id.to_string()[..8]),
        role,
        is_active: true,
        created_at: Utc::now(),
    }
}

/// A workflow step; `workflow()` fills in the owning workflow id.
pub fn step(order: i32, name: &str, action_type: &str, config: Value) -> WorkflowAction {
    WorkflowAction::new(Uuid::nil(), order, name, action_type, config)
}

pub fn workflow(
    tenant_id: Uuid,
    trigger_type: TriggerType,
    conditions: Option<Value>,
    mut actions: Vec<WorkflowAction>,
) -> Workflow {
    let id = Uuid::new_v4();
    for action in &mut actions {
        action.workflow_id = id;
    }
    Workflow {
        id,
        tenant_id,
        name: format!("Test workflow {}", &id.to_string()[..8]),
        description: None,
        trigger_type,
        conditions,
        is_active: true,
        status: WorkflowStatus::Active,
        actions,
        created_at: Utc::now(),
        updated_at: None,
    }
}

/// A free-standing execution record for driving the executor directly.
pub fn execution(tenant_id: Uuid, entity_type: &str, entity_id: Uuid, data: Value) -> WorkflowExecution {
    WorkflowExecution {
        id: Uuid::new_v4(),
        workflow_id: Uuid::new_v4(),
        tenant_id,
        status: ExecutionStatus::Running,
        trigger_type: TriggerType::ContactCreated,
        entity_type: entity_type.to_string(),
        entity_id,
        trigger_data: data,
        next_action_index: 0,
        resume_at: None,
        delay_served: false,
        started_at: Utc::now(),
        completed_at: None,
        error: None,
    }
}
