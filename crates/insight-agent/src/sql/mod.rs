//! SQL sub-task: validate, execute, repair, advise.
//!
//! - [`types`] -- Query plans, step errors, attempts and results.
//! - [`machine`] -- The [`SqlPipeline`] state machine and its collaborator traits.
//! - [`narrow`] -- Cutting the data mart description down to the plan's tables.

pub mod machine;
pub mod narrow;
pub mod types;

pub use machine::{AdvisorAgent, RepairAgent, SqlPipeline, SqlPipelineConfig, SqlTaskInput};
pub use narrow::narrow_schema;
pub use types::{
    Advice, AdvisorInput, PlanTable, QueryPlan, QueryRepairAttempt, RepairInput, RepairVerdict,
    SqlErrorKind, SqlRunResult, SqlRunStatus, SqlStepError,
};
