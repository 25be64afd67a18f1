//! Meeting confirmation lifecycle engine.
//!
//! Owns the meeting state machine and everything it drives: the signed
//! confirm/cancel link codec, the idempotent delayed-task scheduler client,
//! the calendar change detector, and the orchestrator that ties them to the
//! meeting store and the calendar/email collaborators.

pub mod clock;
pub mod collaborators;
pub mod detector;
pub mod error;
pub mod fakes;
pub mod orchestrator;
pub mod scheduler;
pub mod secrets;
pub mod state_machine;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CalendarProvider, EmailMessage, EmailSender, EmailTemplate, EventDraft, TimeWindow,
};
pub use detector::{ChangeDetector, ChangeNotification, Relevance, ResourceState};
pub use error::{
    CollaboratorError, OrchestratorError, SchedulerError, SecretError, TokenError,
    TransitionError,
};
pub use orchestrator::{
    CallbackOutcome, DetectionOutcome, NotificationOutcome, OnboardingRun, Orchestrator,
    OrchestratorDeps, OrchestratorSettings, UserActionOutcome,
};
pub use scheduler::{
    CreateTaskError, DelayedTaskService, LocalTaskQueue, MemoryTaskService, ScheduleOutcome,
    SchedulerClient, TaskRequest, TaskRunner,
};
pub use secrets::{EnvSecretStore, FileSecretStore, LayeredSecretStore, SecretStore, StaticSecretStore};
pub use token::{TokenClaims, TokenCodec};
