//! Resilient HTTP client for agent-to-agent messages.
//!
//! # Responsibilities
//! - POST JSON messages to agent or gateway endpoints
//! - Wrap every send as breaker → retry → HTTP call, one breaker per target host
//! - Classify failures: connection errors, timeouts and 5xx retry; 4xx do not
//!
//! # Design Decisions
//! - A whole retry sequence counts as one breaker outcome
//! - In-flight requests race the caller's context so cancellation is prompt
//! - Response bodies are returned as raw JSON; interpretation belongs to the caller

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::schema::ResilienceConfig;
use crate::resilience::{
    is_retryable, retry_with_config, BreakerError, BreakerRegistry, Context, ContextError,
    RetryConfig, RetryError,
};

/// Failure of a single HTTP exchange with an agent.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Target URL could not be parsed or has no host.
    #[error("invalid agent URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection, timeout or protocol failure.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The agent answered with a non-success status.
    #[error("agent at {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The agent answered with a body that is not JSON.
    #[error("agent at {url} returned invalid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The caller's context finished while the request was in flight.
    #[error("request abandoned")]
    Cancelled(#[from] ContextError),
}

impl TransportError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Client(_)
            | TransportError::InvalidUrl { .. }
            | TransportError::Decode { .. }
            | TransportError::Cancelled(_) => false,
        }
    }
}

/// Error returned by [`AgentClient::send`].
pub type SendError = BreakerError<RetryError<TransportError>>;

/// Classifier used for agent sends; defers to [`TransportError::is_retryable`].
pub fn is_transport_retryable(err: &(dyn Error + 'static)) -> bool {
    match err.downcast_ref::<TransportError>() {
        Some(transport) => transport.is_retryable(),
        None => is_retryable(err),
    }
}

/// HTTP client sending JSON messages through circuit breakers and retries.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
}

impl AgentClient {
    /// Create a client from configuration.
    pub fn new(config: &ResilienceConfig) -> Result<Self, TransportError> {
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_defaults.clone(),
            config.breakers.clone(),
        ));
        Self::with_registry(config, breakers)
    }

    /// Create a client sharing an existing breaker registry.
    pub fn with_registry(
        config: &ResilienceConfig,
        breakers: Arc<BreakerRegistry>,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.client.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.client.connect_timeout_ms))
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            http,
            breakers,
            retry: config.retry.to_retry_config().with_retry_if(is_transport_retryable),
        })
    }

    /// Breakers used by this client, keyed by `host:port`.
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// POST `message` as JSON to `url` and return the JSON response.
    ///
    /// An empty response body yields `Value::Null`.
    pub async fn send<M>(&self, ctx: &Context, url: &str, message: &M) -> Result<Value, SendError>
    where
        M: Serialize + ?Sized,
    {
        let target =
            parse_target(url).map_err(|e| BreakerError::Operation(RetryError::Operation(e)))?;
        let breaker = self.breakers.get_or_create(&target.dependency);

        breaker
            .execute(|| {
                retry_with_config(ctx, &self.retry, || self.post(ctx, &target.url, message))
            })
            .await
    }

    async fn post<M>(&self, ctx: &Context, url: &Url, message: &M) -> Result<Value, TransportError>
    where
        M: Serialize + ?Sized,
    {
        tokio::select! {
            result = self.exchange(url, message) => result,
            err = ctx.done() => Err(TransportError::Cancelled(err)),
        }
    }

    async fn exchange<M>(&self, url: &Url, message: &M) -> Result<Value, TransportError>
    where
        M: Serialize + ?Sized,
    {
        let request_error = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .post(url.clone())
            .json(message)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Agent returned error status");
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|source| TransportError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

struct Target {
    url: Url,
    /// Breaker key: `host:port`.
    dependency: String,
}

fn parse_target(raw: &str) -> Result<Target, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;

    Ok(Target {
        dependency: format!("{}:{}", host, port),
        url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let target = parse_target("http://127.0.0.1:8100/messages").unwrap();
        assert_eq!(target.dependency, "127.0.0.1:8100");

        let target = parse_target("https://gateway.example/forward").unwrap();
        assert_eq!(target.dependency, "gateway.example:443");
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(matches!(
            parse_target("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_target("unix:/tmp/agent.sock"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_status_classification() {
        let server_error = TransportError::Status {
            url: "http://agent".to_string(),
            status: 503,
        };
        let client_error = TransportError::Status {
            url: "http://agent".to_string(),
            status: 401,
        };

        assert!(server_error.is_retryable());
        assert!(!client_error.is_retryable());
        assert!(is_transport_retryable(&server_error));
        assert!(!is_transport_retryable(&client_error));
        assert!(!is_transport_retryable(&TransportError::Cancelled(ContextError::Canceled)));
        assert!(!is_transport_retryable(&ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_breaker() {
        let client = AgentClient::new(&ResilienceConfig::default()).unwrap();
        let err = client
            .send(&Context::background(), "::::", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BreakerError::Operation(RetryError::Operation(TransportError::InvalidUrl { .. }))
        ));
        assert!(client.breakers().is_empty());
    }
}
