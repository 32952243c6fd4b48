use crate::error::LimitError;
use crate::rate_limit::{Decision, RateLimiter};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that enforces rate limits using a [`RateLimiter`].
///
/// `key` derives the limiter name from each request (client id, IP, route...).
pub struct RateLimitLayer<L, F> {
    limiter: Arc<L>,
    key: Arc<F>,
}

impl<L, F> Clone for RateLimitLayer<L, F> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key: self.key.clone() }
    }
}

impl<L, F> RateLimitLayer<L, F> {
    /// Create a new rate limit layer.
    pub fn new(limiter: L, key: F) -> Self {
        Self { limiter: Arc::new(limiter), key: Arc::new(key) }
    }

    /// Share a limiter that is also used outside the middleware.
    pub fn from_arc(limiter: Arc<L>, key: F) -> Self {
        Self { limiter, key: Arc::new(key) }
    }
}

impl<S, L, F> Layer<S> for RateLimitLayer<L, F>
where
    L: RateLimiter + 'static,
{
    type Service = RateLimitService<S, L, F>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, limiter: self.limiter.clone(), key: self.key.clone() }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<S, L, F> {
    inner: S,
    limiter: Arc<L>,
    key: Arc<F>,
}

impl<S: Clone, L, F> Clone for RateLimitService<S, L, F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone(), key: self.key.clone() }
    }
}

impl<S, L, F, Req> Service<Req> for RateLimitService<S, L, F>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + Sync + std::error::Error + 'static,
    L: RateLimiter + 'static,
    F: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = LimitError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(LimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let name = (self.key)(&req);
        // Swap so the instance that was polled ready serves this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.check(&name).await {
                Ok(Decision::Allowed { .. }) => inner.call(req).await.map_err(LimitError::Inner),
                Ok(Decision::Denied { hits, max_hits }) => {
                    Err(LimitError::Limited { name, hits, max_hits })
                }
                Err(e) => {
                    tracing::warn!(target: "tallystore::middleware", name = %name, error = %e, "rate limiter unavailable");
                    Err(LimitError::Store(e))
                }
            }
        })
    }
}
