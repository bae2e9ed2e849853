//! # Call Test Utilities
//!
//! Shared test utilities for the call engine.
//!
//! This crate provides mock implementations of every collaborator trait and
//! fixtures for driving a session without a media SDK.
//!
//! ## Modules
//!
//! - `mock_transport` - Scriptable `MediaTransport` with event injection
//! - `mock_crypto` - `CryptoProvider` built on `ring` AES-GCM and HMAC
//! - `mock_contacts` - In-memory `ContactResolver`
//! - `mock_prober` - Scriptable `EndpointProber`
//! - `static_config` - Fixed `ConfigSource`
//! - `fixtures` - Identities, keys, event builders and the `TestCall` builder
//!
//! ## Usage
//!
//! ```rust,ignore
//! use call_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let session = TestCall::outgoing(CallKind::Group).spawn();
//!     session.establish(&[PEER_IDENTITY]).await;
//!
//!     assert_eq!(*session.handle.observers().status.borrow(), CallStatus::Connected);
//!
//!     session.emit(joined(THIRD_IDENTITY)).await;
//!     session.handle.dispose();
//! }
//! ```

pub mod fixtures;
pub mod mock_contacts;
pub mod mock_crypto;
pub mod mock_prober;
pub mod mock_transport;
pub mod static_config;

pub use fixtures::*;
pub use mock_contacts::MockContacts;
pub use mock_crypto::MockCrypto;
pub use mock_prober::MockProber;
pub use mock_transport::{MockTransport, MockTransportBuilder, PublishedPacket};
pub use static_config::StaticConfig;
