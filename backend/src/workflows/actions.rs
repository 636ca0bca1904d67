// Workflow Actions - The typed action catalog and per-action configs

use chrono::{DateTime, Utc};
use lattice_shared::{ActivityType, DealStage, TaskPriority};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::executor::ActionError;

/// An ordered step of a workflow, as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Position in the workflow's action sequence (ascending)
    pub order: i32,
    pub name: String,
    /// Action type tag as stored ("ADD_CONTACT_TAG", ...)
    pub action_type: String,
    pub config: Value,
    /// Minutes to wait before this action runs. Served by parking the
    /// execution, never by an in-process sleep.
    pub delay_minutes: i32,
}

impl WorkflowAction {
    pub fn new(workflow_id: Uuid, order: i32, name: &str, action_type: &str, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            order,
            name: name.to_string(),
            action_type: action_type.to_string(),
            config,
            delay_minutes: 0,
        }
    }

    pub fn with_delay(mut self, minutes: i32) -> Self {
        self.delay_minutes = minutes;
        self
    }
}

/// Arithmetic applied to a contact's lead score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreOperation {
    Add,
    Subtract,
    Set,
    Multiply,
}

/// How ASSIGN_CONTACT picks an owner when none is named explicitly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentRule {
    RoundRobin,
    LoadBalanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaitUnit {
    Minutes,
    Hours,
    Days,
}

impl Default for WaitUnit {
    fn default() -> Self {
        WaitUnit::Minutes
    }
}

/// Direct field overwrites for UPDATE_CONTACT. Keys outside the known
/// contact columns are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactFieldPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub stage_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateContactConfig {
    pub update_fields: Option<ContactFieldPatch>,
    pub add_tags: Option<Vec<String>>,
    pub lead_score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactStageConfig {
    pub stage_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddContactTagConfig {
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactScoreConfig {
    pub operation: ScoreOperation,
    pub value: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateDealConfig {
    pub deal_name: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub stage: Option<DealStage>,
    pub probability: Option<i32>,
    pub description: Option<String>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskConfig {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due_in_days: Option<i64>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateActivityConfig {
    #[serde(rename = "type")]
    pub activity_type: Option<ActivityType>,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignContactConfig {
    pub assigned_to: Option<Uuid>,
    pub assignment_rule: Option<AssignmentRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendEmailConfig {
    pub subject: Option<String>,
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendNotificationConfig {
    pub message: Option<String>,
    pub recipient_role: Option<String>,
    pub channels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitConfig {
    pub delay: Option<i64>,
    pub unit: WaitUnit,
}

impl WaitConfig {
    /// Requested suspension in milliseconds. Delay defaults to 1 unit.
    pub fn delay_ms(&self) -> i64 {
        let delay = self.delay.unwrap_or(1).max(0);
        let unit_ms = match self.unit {
            WaitUnit::Minutes => 60_000,
            WaitUnit::Hours => 3_600_000,
            WaitUnit::Days => 86_400_000,
        };
        delay.saturating_mul(unit_ms)
    }
}

/// Closed dispatch table over the stored action-type tags. Unrecognized
/// tags parse to `Unknown` so a workflow authored against a newer
/// catalog degrades to a skipped step instead of failing the run.
#[derive(Debug, Clone)]
pub enum ActionSpec {
    UpdateContact(UpdateContactConfig),
    UpdateContactStage(UpdateContactStageConfig),
    AddContactTag(AddContactTagConfig),
    UpdateContactScore(UpdateContactScoreConfig),
    CreateDeal(CreateDealConfig),
    CreateTask(CreateTaskConfig),
    CreateActivity(CreateActivityConfig),
    AssignContact(AssignContactConfig),
    SendEmail(SendEmailConfig),
    SendNotification(SendNotificationConfig),
    Wait(WaitConfig),
    Unknown { action_type: String },
}

impl ActionSpec {
    pub fn parse(action: &WorkflowAction) -> Result<ActionSpec, ActionError> {
        let cfg = &action.config;
        let spec = match action.action_type.as_str() {
            "UPDATE_CONTACT" => ActionSpec::UpdateContact(from_config(cfg)?),
            "UPDATE_CONTACT_STAGE" => ActionSpec::UpdateContactStage(from_config(cfg)?),
            "ADD_CONTACT_TAG" => ActionSpec::AddContactTag(from_config(cfg)?),
            "UPDATE_CONTACT_SCORE" => ActionSpec::UpdateContactScore(from_config(cfg)?),
            "CREATE_DEAL" => ActionSpec::CreateDeal(from_config(cfg)?),
            "CREATE_TASK" => ActionSpec::CreateTask(from_config(cfg)?),
            "CREATE_ACTIVITY" => ActionSpec::CreateActivity(from_config(cfg)?),
            "ASSIGN_CONTACT" => ActionSpec::AssignContact(from_config(cfg)?),
            "SEND_EMAIL" => ActionSpec::SendEmail(from_config(cfg)?),
            "SEND_NOTIFICATION" => ActionSpec::SendNotification(from_config(cfg)?),
            "WAIT" => ActionSpec::Wait(from_config(cfg)?),
            other => ActionSpec::Unknown {
                action_type: other.to_string(),
            },
        };
        Ok(spec)
    }
}

fn from_config<T: DeserializeOwned>(config: &Value) -> Result<T, ActionError> {
    // A null config reads like an empty object so all-optional configs
    // fall back to their defaults
    let value = if config.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        config.clone()
    };
    serde_json::from_value(value).map_err(|e| ActionError::InvalidConfig(e.to_string()))
}

/// Computes the wall-clock resume time for a parked delay.
pub fn resume_time_after(now: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(action_type: &str, config: Value) -> WorkflowAction {
        WorkflowAction::new(Uuid::new_v4(), 0, "test", action_type, config)
    }

    #[test]
    fn unknown_action_type_parses_to_unknown() {
        let a = action("LAUNCH_ROCKET", json!({}));
        match ActionSpec::parse(&a).unwrap() {
            ActionSpec::Unknown { action_type } => assert_eq!(action_type, "LAUNCH_ROCKET"),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn score_config_parses_operation_and_value() {
        let a = action("UPDATE_CONTACT_SCORE", json!({ "operation": "subtract", "value": 15 }));
        match ActionSpec::parse(&a).unwrap() {
            ActionSpec::UpdateContactScore(cfg) => {
                assert_eq!(cfg.operation, ScoreOperation::Subtract);
                assert_eq!(cfg.value, Some(15));
            }
            other => panic!("expected UpdateContactScore, got {:?}", other),
        }
    }

    #[test]
    fn malformed_config_is_invalid() {
        let a = action("UPDATE_CONTACT_SCORE", json!({ "operation": "divide" }));
        assert!(matches!(
            ActionSpec::parse(&a),
            Err(ActionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn null_config_falls_back_to_defaults() {
        let a = action("WAIT", Value::Null);
        match ActionSpec::parse(&a).unwrap() {
            ActionSpec::Wait(cfg) => assert_eq!(cfg.delay_ms(), 60_000),
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn wait_delay_scales_with_unit() {
        let cfg: WaitConfig = serde_json::from_value(json!({ "delay": 2, "unit": "hours" })).unwrap();
        assert_eq!(cfg.delay_ms(), 7_200_000);
        let cfg: WaitConfig = serde_json::from_value(json!({ "delay": 3, "unit": "days" })).unwrap();
        assert_eq!(cfg.delay_ms(), 259_200_000);
        let cfg: WaitConfig = serde_json::from_value(json!({ "delay": 5 })).unwrap();
        assert_eq!(cfg.delay_ms(), 300_000);
    }

    #[test]
    fn assignment_rule_uses_kebab_case() {
        let rule: AssignmentRule = serde_json::from_str("\"round-robin\"").unwrap();
        assert_eq!(rule, AssignmentRule::RoundRobin);
        let rule: AssignmentRule = serde_json::from_str("\"load-balanced\"").unwrap();
        assert_eq!(rule, AssignmentRule::LoadBalanced);
    }
}
