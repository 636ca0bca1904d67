// Workflow Conditions - Gate checks between an event and a workflow

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::triggers::{TriggerEvent, TriggerType};

/// Typed view of a workflow's stored conditions object. Unrecognized
/// keys are preserved in `extra` so round-tripping a workflow through
/// the API never drops them, but they do not constrain matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerConditions {
    /// Allow-list of form ids, applied to FORM_SUBMITTED events.
    pub form_ids: Option<Vec<String>>,
    /// Allow-list of sender numbers, applied to WHATSAPP_MESSAGE_RECEIVED events.
    pub phone_numbers: Option<Vec<String>>,
    /// Keywords matched case-insensitively against the message text.
    pub message_keywords: Option<Vec<String>>,
    /// Allow-list of campaign ids, applied to EMAIL_OPENED events.
    pub campaign_ids: Option<Vec<String>>,
    /// Required acquisition source of the entity.
    pub source: Option<String>,
    /// Tags the entity must all carry.
    pub required_tags: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TriggerConditions {
    /// All configured checks are combined with AND.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if event.trigger_type == TriggerType::FormSubmitted {
            if let Some(form_ids) = &self.form_ids {
                let form_id = event.data.get("formId").and_then(Value::as_str);
                if !form_id.is_some_and(|id| form_ids.iter().any(|f| f == id)) {
                    return false;
                }
            }
        }

        if event.trigger_type == TriggerType::WhatsappMessageReceived {
            if let Some(numbers) = &self.phone_numbers {
                let phone = event.data.get("phoneNumber").and_then(Value::as_str);
                if !phone.is_some_and(|p| numbers.iter().any(|n| n == p)) {
                    return false;
                }
            }

            if let Some(keywords) = &self.message_keywords {
                let text = event
                    .data
                    .get("messageText")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                if !keywords.iter().any(|k| text.contains(&k.to_lowercase())) {
                    return false;
                }
            }
        }

        if event.trigger_type == TriggerType::EmailOpened {
            if let Some(campaign_ids) = &self.campaign_ids {
                let campaign = event.data.get("campaignId").and_then(Value::as_str);
                if !campaign.is_some_and(|c| campaign_ids.iter().any(|id| id == c)) {
                    return false;
                }
            }
        }

        if let Some(source) = &self.source {
            let event_source = event.data.get("source").and_then(Value::as_str);
            if event_source != Some(source.as_str()) {
                return false;
            }
        }

        if let Some(required) = &self.required_tags {
            let tags: Vec<&str> = event
                .data
                .get("tags")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            if !required.iter().all(|t| tags.contains(&t.as_str())) {
                return false;
            }
        }

        true
    }
}

/// Evaluate a workflow's raw stored conditions against an event.
/// Absent, null, and non-object conditions impose no restriction.
pub fn conditions_match(conditions: Option<&Value>, event: &TriggerEvent) -> bool {
    let Some(raw) = conditions else { return true };
    let Some(obj) = raw.as_object() else { return true };
    let parsed: TriggerConditions =
        serde_json::from_value(Value::Object(obj.clone())).unwrap_or_default();
    parsed.matches(event)
}
