//! Time-boxed credentials for the external store, cached and refreshed
//! lazily.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::CredentialError;

/// Refresh interval used by the hosting platform, plus slack.
pub const DEFAULT_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(1800 + 5);
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Expired, or will be within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_at
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, CredentialError>;
}

/// Issues opaque numbered tokens with a fixed lifetime. Stands in for the
/// platform's role-assumption call in local runs.
#[derive(Debug)]
pub struct StaticCredentialProvider {
    prefix: String,
    lifetime: Duration,
    issued: AtomicU64,
}

impl StaticCredentialProvider {
    pub fn new(prefix: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            lifetime,
            issued: AtomicU64::new(0),
        }
    }

    /// Number of credentials handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

impl Default for StaticCredentialProvider {
    fn default() -> Self {
        Self::new("local", DEFAULT_CREDENTIAL_LIFETIME)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        let serial = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Credential::new(
            format!("{}-{}", self.prefix, serial),
            self.lifetime,
        ))
    }
}

/// Shared credential cache. Refresh happens under the lock, so concurrent
/// callers that find the credential stale wait for one acquisition instead
/// of each starting their own.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    current: Mutex<Option<Credential>>,
    refresh_margin: Duration,
    acquire_timeout: Duration,
}

impl CredentialCache {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self::with_timing(provider, DEFAULT_REFRESH_MARGIN, DEFAULT_ACQUIRE_TIMEOUT)
    }

    pub fn with_timing(
        provider: Arc<dyn CredentialProvider>,
        refresh_margin: Duration,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            current: Mutex::new(None),
            refresh_margin,
            acquire_timeout,
        }
    }

    /// Returns a credential that is valid for at least the refresh margin.
    pub async fn get(&self) -> Result<Credential, CredentialError> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref() {
            if !credential.expires_within(self.refresh_margin) {
                return Ok(credential.clone());
            }
            debug!("Cached credential is about to expire, refreshing");
        }

        let credential = match tokio::time::timeout(self.acquire_timeout, self.provider.acquire())
            .await
        {
            Ok(Ok(credential)) => credential,
            Ok(Err(e)) => {
                warn!("Failed to acquire store credential: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Store credential acquisition timed out after {:?}",
                    self.acquire_timeout
                );
                return Err(CredentialError::Timeout(self.acquire_timeout));
            }
        };

        info!("Acquired new store credential");
        *current = Some(credential.clone());
        Ok(credential)
    }
}
