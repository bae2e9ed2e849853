//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Every piece of
//! key material the call engine handles goes through these wrappers:
//!
//! - the application token presented to the media server on connect,
//! - the local identity private key used to sign control messages,
//! - the per-call E2EE session key recovered from the start-call response.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct that derives `Debug` while holding one of them is safe to log via
//! `{:?}` or tracing fields. Values are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretBox};
//!
//! #[derive(Debug)]
//! struct SessionKeys {
//!     room_id: String,
//!     e2ee_key: SecretBox<Vec<u8>>,
//! }
//!
//! let keys = SessionKeys {
//!     room_id: "room-1".to_string(),
//!     e2ee_key: SecretBox::new(Box::new(vec![7u8; 32])),
//! };
//!
//! // Debug output hides the key bytes
//! println!("{:?}", keys);
//!
//! // Access must be explicit
//! assert_eq!(keys.e2ee_key.expose_secret().len(), 32);
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Copy raw key bytes into a fresh `SecretBox`.
#[must_use]
pub fn secret_bytes(bytes: &[u8]) -> SecretBox<Vec<u8>> {
    SecretBox::new(Box::new(bytes.to_vec()))
}

/// Clone the bytes held by a `SecretBox` into a new one.
///
/// `SecretBox<Vec<u8>>` is not `Clone`; this keeps the copy inside a
/// zeroizing wrapper instead of handing out a bare `Vec`.
#[must_use]
pub fn clone_secret_bytes(secret: &SecretBox<Vec<u8>>) -> SecretBox<Vec<u8>> {
    secret_bytes(secret.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("app-token-abc");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("app-token-abc"));
    }

    #[test]
    fn test_secret_bytes_round_trip() {
        let key = secret_bytes(&[1, 2, 3, 4]);
        assert_eq!(key.expose_secret().as_slice(), &[1, 2, 3, 4]);

        let copy = clone_secret_bytes(&key);
        assert_eq!(copy.expose_secret(), key.expose_secret());
    }

    #[test]
    fn test_struct_with_key_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct Keys {
            room_id: String,
            e2ee_key: SecretBox<Vec<u8>>,
        }

        let keys = Keys {
            room_id: "room-42".to_string(),
            e2ee_key: secret_bytes(b"super-secret-key"),
        };

        let debug_str = format!("{keys:?}");
        assert!(debug_str.contains("room-42"));
        assert!(!debug_str.contains("super-secret-key"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            uid: String,
            app_token: SecretString,
        }

        let json = r#"{"uid": "+100001", "app_token": "my-secret-value"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.app_token.expose_secret(), "my-secret-value");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
    }
}
