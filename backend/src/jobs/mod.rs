// Background Jobs
//
// Long-running loops that keep the workflow engine honest while the
// HTTP surface is idle. Currently just the execution resumer, which
// wakes parked executions whose durable delay has elapsed.

pub mod resumer;

pub use resumer::ExecutionResumer;
