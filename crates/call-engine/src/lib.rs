//! Call Engine Library
//!
//! Client-side orchestration of real-time audio/video calls:
//!
//! - Media-server selection by measured latency and recent errors
//! - An encrypted control channel (chat, mute requests, raised hands,
//!   countdowns) carried over the media transport's data channel
//! - A per-call state machine with connect fallback, idle detection and
//!   1:1 ring/leave timeouts
//! - A process-wide registry of known calls with de-duplicated incoming
//!   notifications
//!
//! # Architecture
//!
//! ```text
//! ServerSelectionEngine ──(ranked urls)──► CallSessionController ──► MediaTransport
//!                                             │        ▲
//!                                 SignalingCodec        │ TransportEvent
//!                                             ▼        │
//!                                          CallRegistry
//! ```
//!
//! The media transport, key-exchange crypto, contact lookup and endpoint
//! probing are collaborators behind the traits in [`ports`].
//!
//! # Modules
//!
//! - [`actors`] - Session and registry actors
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types surfaced to callers and observers
//! - [`observability`] - Prometheus metrics
//! - [`ports`] - Collaborator traits and their data types
//! - [`selection`] - `ServerSelectionEngine` and the HTTP prober
//! - [`session`] - Status machine, participants, timers and observers
//! - [`signaling`] - `SignalingCodec` for control messages

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod ports;
pub mod selection;
pub mod session;
pub mod signaling;
