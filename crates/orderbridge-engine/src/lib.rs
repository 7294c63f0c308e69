pub mod approval;
pub mod backoff;
pub mod dedup;
pub mod event_source;
pub mod orders;
pub mod subscriber;
pub mod translator;

pub use approval::{ApprovalOutcome, ApprovalPublisher};
pub use backoff::ReconnectPolicy;
pub use event_source::{EventSource, EventSubscription};
pub use orders::OrderQueryService;
pub use subscriber::{ChangeStreamSubscriber, StreamHandle, StreamState};
pub use translator::{translate, EventRule, SubmittedToManufacturing, Translator};
