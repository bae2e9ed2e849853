//! Media-server selection.
//!
//! - [`health`] - per-endpoint health records and ranking
//! - [`engine`] - `ServerSelectionEngine` and its probe task
//! - [`http_prober`] - `EndpointProber` over plain HTTP

pub mod engine;
pub mod health;
pub mod http_prober;

pub use engine::{SelectionSettings, ServerSelectionEngine};
pub use health::{HealthTable, ServerHealthRecord};
pub use http_prober::HttpProber;
