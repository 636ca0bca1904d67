pub mod fixtures;

mod actions;

// Common test utilities and shared setup

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::services::{EmailError, EmailSender, NotificationService};
use crate::store::{MemStore, Store};
use crate::workflows::{
    ExecutionStatus, WorkflowEngine, WorkflowExecution, WorkflowTriggers,
};

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub template_id: String,
}

/// EmailSender fake that records deliveries instead of sending
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<SentEmail>>,
    pub fail_next: AtomicBool,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template_id: &str,
        _context: &Value,
    ) -> Result<(), EmailError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EmailError::Smtp("connection refused".to_string()));
        }
        self.sent.lock().await.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            template_id: template_id.to_string(),
        });
        Ok(())
    }
}

pub struct TestContext {
    pub tenant_id: Uuid,
    pub store: Arc<MemStore>,
    pub engine: WorkflowEngine,
    pub triggers: WorkflowTriggers,
    pub email: Arc<RecordingEmailSender>,
    pub settings: EngineSettings,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemStore::new());
        let email = Arc::new(RecordingEmailSender::default());
        let notifier = Arc::new(NotificationService::new(store.clone()));
        let settings = EngineSettings {
            max_inline_wait: Duration::from_millis(50),
            resume_poll_interval: Duration::from_millis(20),
        };
        let engine = WorkflowEngine::new(store.clone(), email.clone(), notifier, &settings);
        let triggers = WorkflowTriggers::new(engine.clone());
        Self {
            tenant_id: Uuid::new_v4(),
            store,
            engine,
            triggers,
            email,
            settings,
        }
    }

    /// Poll the store until the execution satisfies `pred`. Executions
    /// run on spawned tasks, so assertions have to wait for them.
    pub async fn wait_until<F>(&self, execution_id: Uuid, pred: F) -> WorkflowExecution
    where
        F: Fn(&WorkflowExecution) -> bool,
    {
        for _ in 0..200 {
            if let Some(execution) = self.store.execution(execution_id).await.unwrap() {
                if pred(&execution) {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {} did not reach the expected state", execution_id);
    }

    pub async fn wait_for_terminal(&self, execution_id: Uuid) -> WorkflowExecution {
        self.wait_until(execution_id, |e| e.status != ExecutionStatus::Running)
            .await
    }

    pub async fn wait_for_parked(&self, execution_id: Uuid) -> WorkflowExecution {
        self.wait_until(execution_id, |e| e.resume_at.is_some()).await
    }
}
