//! An in-memory credential store

use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

use super::{BoxError, CredentialStore};
use crate::{CredentialPair, Credentials};

/// A credential store that lives only as long as the process
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<Credentials>,
}

impl InMemoryCredentialStore {
    /// Constructs an empty store
    pub const fn new() -> Self {
        Self {
            credentials: RwLock::new(Credentials::empty()),
        }
    }

    /// Constructs a store already holding a pair of tokens
    pub fn with_credentials(credentials: CredentialPair) -> Self {
        Self {
            credentials: RwLock::new(credentials.into()),
        }
    }

    pub(crate) fn snapshot(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace(&self, credentials: Credentials) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> Credentials {
        self.snapshot()
    }

    async fn save(&self, credentials: CredentialPair) -> Result<(), BoxError> {
        self.replace(credentials.into());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BoxError> {
        self.replace(Credentials::empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_store_is_logged_out() {
        let store = InMemoryCredentialStore::new();
        let credentials = store.load().await;
        assert!(credentials.is_empty());
        assert!(credentials.access_token().is_none());
        assert!(credentials.refresh_token().is_none());
    }

    #[tokio::test]
    async fn save_replaces_both_tokens() {
        let store = InMemoryCredentialStore::with_credentials(CredentialPair::new("A1", "B1"));
        store.save(CredentialPair::new("A2", "B2")).await.unwrap();

        let credentials = store.load().await;
        assert_eq!(credentials.access_token().unwrap().as_str(), "A2");
        assert_eq!(credentials.refresh_token().unwrap().as_str(), "B2");
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let store = InMemoryCredentialStore::with_credentials(CredentialPair::new("A1", "B1"));
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_empty());
    }
}
