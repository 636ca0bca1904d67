// In-app notifications fanned out to role holders

use async_trait::async_trait;
use chrono::Utc;
use lattice_shared::{Notification, UserRole};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a notification dispatch actually reached
#[derive(Debug, Clone)]
pub struct NotificationReceipt {
    pub recipients: usize,
    pub channels: Vec<String>,
}

/// Dispatch seam used by the SEND_NOTIFICATION action
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify_role(
        &self,
        tenant_id: Uuid,
        recipient_role: &str,
        message: &str,
        channels: &[String],
    ) -> Result<NotificationReceipt, NotifyError>;
}

/// Persists one in-app notification per active role holder. Channels
/// other than "in_app" are acknowledged but not yet delivered.
pub struct NotificationService {
    store: Arc<dyn Store>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSender for NotificationService {
    async fn notify_role(
        &self,
        tenant_id: Uuid,
        recipient_role: &str,
        message: &str,
        channels: &[String],
    ) -> Result<NotificationReceipt, NotifyError> {
        let role: Option<UserRole> =
            serde_json::from_str(&format!("\"{}\"", recipient_role)).ok();
        let Some(role) = role else {
            warn!("Unknown notification recipient role '{}'", recipient_role);
            return Ok(NotificationReceipt {
                recipients: 0,
                channels: channels.to_vec(),
            });
        };

        let users = self
            .store
            .active_users_in_roles(tenant_id, &[role])
            .await?;

        for user in &users {
            let notification = Notification {
                id: Uuid::new_v4(),
                tenant_id,
                user_id: user.id,
                title: "Workflow notification".to_string(),
                message: message.to_string(),
                channel: "in_app".to_string(),
                read: false,
                created_at: Utc::now(),
            };
            self.store.create_notification(&notification).await?;
        }

        for channel in channels {
            if channel != "in_app" {
                info!(
                    "Channel '{}' requested for workflow notification; delivery not wired up",
                    channel
                );
            }
        }

        Ok(NotificationReceipt {
            recipients: users.len(),
            channels: channels.to_vec(),
        })
    }
}
