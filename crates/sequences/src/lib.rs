//! Sequence automation — multi-step, multi-channel outreach sequences with
//! per-lead enrollments, send-window scheduling, reply/meeting stop rules
//! and funnel analytics.

pub mod analytics;
pub mod clock;
pub mod engine;
pub mod locks;
pub mod renderer;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod throttle;
pub mod types;

pub use analytics::SequenceAnalytics;
pub use clock::{ManualTime, SystemTime, TimeSource};
pub use engine::{Claim, DispatchJob, SequenceEngine};
pub use repository::{InMemoryRepository, SequenceRepository};
pub use runner::{Dispatcher, LogDispatcher, RunSummary, SequenceRunner};
pub use store::SequenceStore;
pub use throttle::DailySendLimiter;
