// Workflow Automation Engine
//
// Event-driven automation for the Lattice CRM. Triggers observe CRM
// mutations, conditions gate which workflows react, and actions run as
// an ordered, audited sequence per execution. Long delays park the
// execution instead of sleeping in-process; the resume scanner in
// `jobs` picks parked executions back up.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod triggers;

pub use actions::{
    ActionSpec, AssignmentRule, ScoreOperation, WaitConfig, WaitUnit, WorkflowAction,
};
pub use conditions::{conditions_match, TriggerConditions};
pub use engine::{
    EngineError, ExecutionStatus, NewExecution, NewExecutionLog, RunOutcome, Workflow,
    WorkflowEngine, WorkflowExecution, WorkflowExecutionLog, WorkflowStatus,
};
pub use executor::{ActionError, ActionExecutor, ActionOutcome, ExecutionContext};
pub use triggers::{TriggerEvent, TriggerType, WorkflowTriggers, SCORE_CHANGE_THRESHOLD};
