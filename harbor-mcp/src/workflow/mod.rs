//! Workflow engine: declarative specs compiled into step DAGs and
//! executed with streaming progress and shared context

pub mod executor;
pub mod graph;
pub mod spec;
pub mod triggers;

pub use executor::{ExecutionOptions, WorkflowEngine, WorkflowEvent, WorkflowExecution};
pub use graph::{compile, Guard, ResultSpec, Step, WorkflowGraph};
pub use spec::{StepSpec, TriggerSpec, WorkflowSpec};
pub use triggers::{TriggerManager, TriggerRegistration};
