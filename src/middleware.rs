//! Tower middleware enforcing admission control in front of a service.
//!
//! The layer checks admission per request, records a hit only for requests
//! actually forwarded, and keeps denial distinct from store failure so hosts
//! can map them to different responses (rejection with `Retry-After` vs.
//! service degradation). With [`wait_for_reset`](AdmissionLayer::wait_for_reset)
//! enabled, denied requests drive the bounded retry protocol before giving up.

use crate::config::RateLimitConfig;
use crate::error::{ConfigError, RateLimitError};
use crate::limiter::RateLimiter;
use crate::store::CounterStore;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tower_layer::Layer;
use tower_service::Service;

/// Error surface of [`AdmissionService`].
#[derive(Debug, Error)]
pub enum AdmissionError<E> {
    /// The limiter configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The request was denied (possibly after waiting out the window).
    #[error("admission denied; window resets in {retry_after:?}")]
    Denied {
        /// Time until the denying window resets.
        retry_after: Duration,
    },
    /// The counter store could not be reached. Distinct from denial.
    #[error("counter store unavailable: {0}")]
    Store(String),
    /// The wrapped service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> AdmissionError<E> {
    fn from_limit<SE: std::fmt::Display>(err: RateLimitError<SE>) -> Self {
        match err {
            RateLimitError::Config(e) => Self::Config(e),
            RateLimitError::Store(e) => Self::Store(e.to_string()),
        }
    }

    /// Check if this error is a denial (as opposed to a failure).
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }
}

/// A layer that gates requests through a [`RateLimiter`].
pub struct AdmissionLayer<C> {
    limiter: Arc<RateLimiter<C>>,
    config: RateLimitConfig,
    wait_for_reset: bool,
}

impl<C> Clone for AdmissionLayer<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            config: self.config.clone(),
            wait_for_reset: self.wait_for_reset,
        }
    }
}

impl<C> AdmissionLayer<C>
where
    C: CounterStore,
{
    /// Gate requests against `config`, counting through `limiter`'s store.
    pub fn new(limiter: RateLimiter<C>, config: RateLimitConfig) -> Self {
        Self { limiter: Arc::new(limiter), config, wait_for_reset: false }
    }

    /// Wait out the window (bounded by the config's `max_retries`) instead of
    /// rejecting denied requests immediately.
    pub fn wait_for_reset(mut self, wait: bool) -> Self {
        self.wait_for_reset = wait;
        self
    }
}

impl<S, C> Layer<S> for AdmissionLayer<C>
where
    C: CounterStore,
{
    type Service = AdmissionService<S, C>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            config: self.config.clone(),
            wait_for_reset: self.wait_for_reset,
        }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, C> {
    inner: S,
    limiter: Arc<RateLimiter<C>>,
    config: RateLimitConfig,
    wait_for_reset: bool,
}

impl<S: Clone, C> Clone for AdmissionService<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
            wait_for_reset: self.wait_for_reset,
        }
    }
}

impl<S, C, Req> Service<Req> for AdmissionService<S, C>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    C: CounterStore + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let config = self.config.clone();
        let wait_for_reset = self.wait_for_reset;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let result = limiter.check(&config).await.map_err(AdmissionError::from_limit)?;

            let admitted = if result.allowed {
                true
            } else if wait_for_reset {
                result.retry().await.map_err(AdmissionError::from_limit)?
            } else {
                false
            };

            if !admitted {
                return Err(AdmissionError::Denied { retry_after: result.retry_after() });
            }

            // Only forwarded requests consume a slot.
            limiter.record_hit(&config).await.map_err(AdmissionError::from_limit)?;
            inner.call(req).await.map_err(AdmissionError::Inner)
        })
    }
}
