//! Fetcher seam for reads that reach the backing store.

use async_trait::async_trait;
use frugal_core::FetchError;
use std::future::Future;
use std::time::Duration;

/// Storage fetcher trait for retrieving values from the backing store.
///
/// The gateway calls this only after the budget window granted a read.
/// Errors never reach the gateway's caller; they turn into stale or
/// default values.
#[async_trait]
pub trait StorageFetcher<V>: Send + Sync {
    /// Fetch the current value for `key`.
    async fn fetch(&self, key: &str) -> Result<V, FetchError>;

    /// Upper bound on a single fetch. Exceeding it counts as a fetch error.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Adapts an async closure into a [`StorageFetcher`].
///
/// ```ignore
/// let fetcher = FnFetcher::new(|key| async move { store.load(&key).await })
///     .with_timeout(Duration::from_secs(2));
/// ```
pub struct FnFetcher<F> {
    f: F,
    timeout: Option<Duration>,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<V, F, Fut> StorageFetcher<V> for FnFetcher<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, FetchError>> + Send,
{
    async fn fetch(&self, key: &str) -> Result<V, FetchError> {
        (self.f)(key.to_string()).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Run `fetcher` for `key`, honouring its timeout.
pub async fn fetch_with_timeout<V, S>(fetcher: &S, key: &str) -> Result<V, FetchError>
where
    S: StorageFetcher<V> + ?Sized,
{
    match fetcher.timeout() {
        Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::TimedOut {
                key: key.to_string(),
                timeout: limit,
            }),
        },
        None => fetcher.fetch(key).await,
    }
}
