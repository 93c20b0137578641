pub mod engine;
pub mod intake;
pub mod runs;
pub mod session;
pub mod upload;

pub use engine::{Decision, DecisionOutcome, LifecycleEngine, MediaOutcome, PublishOutcome};
pub use intake::{Intake, IntakeReceipt, StorySubmission, WorkflowSummary};
