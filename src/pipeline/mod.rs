pub mod orchestrator;
pub mod run;
pub mod step;

pub use orchestrator::{Orchestrator, RunOutcome};
pub use run::{Run, RunStatus, StepRecord, StepStatus};
pub use step::{Step, StepContext, StepSet};
