// Execution Resumer Job - Continues parked workflow executions

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::store::Store;
use crate::workflows::{EngineError, RunOutcome, WorkflowEngine};

/// Periodically scans for executions whose durable delay has elapsed
/// and feeds them back into the engine. The scan interval bounds how
/// late a resume can be, not how early.
pub struct ExecutionResumer {
    engine: WorkflowEngine,
    store: Arc<dyn Store>,
    poll_interval: Duration,
}

impl ExecutionResumer {
    pub fn new(engine: WorkflowEngine, store: Arc<dyn Store>, poll_interval: Duration) -> Self {
        Self {
            engine,
            store,
            poll_interval,
        }
    }

    /// Spawn the scan loop. Runs until the process exits.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        info!(
            "Execution resumer started (poll interval: {}s)",
            self.poll_interval.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Resume scan failed: {}", e);
                }
            }
        })
    }

    /// One scan pass. Each due execution resumes on its own task so a
    /// slow one cannot hold up the rest.
    pub async fn run_once(&self) -> Result<usize, EngineError> {
        let due = self.store.due_executions(Utc::now()).await?;
        let count = due.len();
        if count > 0 {
            debug!("Resuming {} parked execution(s)", count);
        }

        for execution in due {
            let engine = self.engine.clone();
            let execution_id = execution.id;
            tokio::spawn(async move {
                match engine.resume_execution(execution).await {
                    Ok(Some(RunOutcome::Completed)) => {
                        debug!("Resumed execution {} ran to completion", execution_id)
                    }
                    Ok(Some(RunOutcome::Parked)) => {
                        debug!("Resumed execution {} parked again", execution_id)
                    }
                    Ok(Some(RunOutcome::Failed)) => {}
                    Ok(None) => {
                        debug!("Execution {} was claimed elsewhere", execution_id)
                    }
                    Err(e) => error!("Failed to resume execution {}: {}", execution_id, e),
                }
            });
        }

        Ok(count)
    }
}
