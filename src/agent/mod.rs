//! Agent core: plan parsing, events, and the iterative pipeline

mod event;
mod pipeline;
mod plan;

pub use event::{Event, EventRole};
pub use pipeline::{MAX_ITERATIONS, Pipeline, PipelineError, RunOptions, StepResult};
pub use plan::{Complexity, Plan, PlanArg, PlanParseError, PlanStep, parse_plan};
