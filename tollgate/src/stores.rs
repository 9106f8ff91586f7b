//! Credential stores

use async_trait::async_trait;
use std::error;

use crate::{CredentialPair, Credentials};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileCredentialStore;
pub use in_memory::InMemoryCredentialStore;

/// A boxed error returned by store persistence
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Process-wide storage for the access and refresh tokens
///
/// Implementations must replace both tokens atomically: a concurrent
/// [`load()`][CredentialStore::load] observes either the old pair or the
/// new pair, never a mix.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Reads both tokens
    async fn load(&self) -> Credentials;

    /// Replaces both tokens
    ///
    /// An error indicates the pair could not be persisted. Subsequent loads
    /// still observe the new pair.
    async fn save(&self, credentials: CredentialPair) -> Result<(), BoxError>;

    /// Removes both tokens
    ///
    /// Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), BoxError>;
}

#[async_trait]
impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    async fn load(&self) -> Credentials {
        (**self).load().await
    }

    async fn save(&self, credentials: CredentialPair) -> Result<(), BoxError> {
        (**self).save(credentials).await
    }

    async fn clear(&self) -> Result<(), BoxError> {
        (**self).clear().await
    }
}
