//! Pure session state used by the session actor.
//!
//! - [`status`] - call status state machine
//! - [`participants`] - participant roster and display ordering
//! - [`timers`] - idle detection, speaker debounce and duration formatting
//! - [`observers`] - watch/broadcast channels a session publishes on

pub mod observers;
pub mod participants;
pub mod status;
pub mod timers;

pub use observers::{SessionNotice, SessionObservers};
pub use participants::{Participant, ParticipantRoster};
pub use status::CallStatus;
pub use timers::{format_duration, DurationCounter, IdleMode};
