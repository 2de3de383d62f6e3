//! Irrigation workflow (spec §4.7): detection, execution, feedback, and
//! the Bayesian threshold learner, wired together by [`workflow`].

pub mod detection;
pub mod execution;
pub mod feedback;
pub mod model;
pub mod ports;
pub mod predictor;
pub mod store;
pub mod workflow;

pub use detection::{DetectionInput, DetectionService};
pub use execution::{ExecutionConfig, ExecutionService};
pub use feedback::FeedbackService;
pub use model::{
    DetectionSnapshot, EligibilityDecision, EligibilityTrace, ExecutionLog, IrrigationFeedback, IrrigationRequest,
    PlantContext, PostCaptureRecommendation, RequestStatus, SkipReason, UserResponseKind, WorkflowConfig,
    WorkflowOutcome,
};
pub use ports::{NoOpNotificationSink, NoPlantResolver, NotificationSink, PlantContextResolver, UnitThresholdCallback};
pub use predictor::{IrrigationPredictor, NoOpPredictor};
pub use store::{IrrigationStore, RequestScope, UnitLockTable, UserPreferenceCounters};
pub use workflow::IrrigationWorkflow;
