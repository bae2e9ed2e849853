//! In-memory contact directory.

use async_trait::async_trait;
use call_engine::ports::ContactResolver;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct Contact {
    public_key: Option<String>,
    display_name: Option<String>,
}

/// [`ContactResolver`] over a fixed map of accounts.
#[derive(Debug, Clone, Default)]
pub struct MockContacts {
    contacts: HashMap<String, Contact>,
}

impl MockContacts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `account` with an identity public key.
    #[must_use]
    pub fn with_public_key(mut self, account: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.contacts.entry(account.into()).or_default().public_key = Some(public_key.into());
        self
    }

    /// Register `account` with a display name.
    #[must_use]
    pub fn with_display_name(mut self, account: impl Into<String>, name: impl Into<String>) -> Self {
        self.contacts.entry(account.into()).or_default().display_name = Some(name.into());
        self
    }
}

#[async_trait]
impl ContactResolver for MockContacts {
    async fn public_key(&self, account: &str) -> Option<String> {
        self.contacts.get(account).and_then(|c| c.public_key.clone())
    }

    async fn display_name(&self, account: &str) -> Option<String> {
        self.contacts.get(account).and_then(|c| c.display_name.clone())
    }
}
