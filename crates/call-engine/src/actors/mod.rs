//! Actors for the call engine.
//!
//! ```text
//! CallRegistry (one per process)
//! └── knows every call this device has seen, by room id
//!
//! CallSessionController (one per call)
//! ├── owns the session state machine and deadlines
//! ├── drives a MediaTransport
//! └── reports into the CallRegistry
//! ```
//!
//! - **Message passing**: handles talk to actors over `tokio::sync::mpsc`,
//!   replies come back on `oneshot` channels
//! - **Cancellation**: every actor listens on a `CancellationToken`; a
//!   session cancelled mid-call is torn down exactly once
//! - **Mailbox monitoring**: depth thresholds with metrics
//!   (Registry: 100/500, Session: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `CallRegistry`, process-wide call bookkeeping
//! - [`session`] - `CallSessionController` per call
//! - [`messages`] - Message and state types shared by the actors
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{CallRegistry, CallRegistryHandle};
pub use session::{
    CallSessionController, CallSessionHandle, SessionDeps, SessionParams, SessionTimeouts,
};
