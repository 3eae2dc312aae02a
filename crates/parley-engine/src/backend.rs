//! HTTP backend contract.
//!
//! The backend exposes two JSON endpoints:
//! - `POST /api/history` with `{"userId"}` returning `{"messages": [...]}`
//! - `POST /api/ask` with `{"prompt", "userId"}` returning `{"reply"}`
//!
//! Timeouts are applied by callers through [`bounded`] so that every backend
//! implementation (including test doubles) is subject to the same deadline.

use crate::config::Config;
use crate::message::Message;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Coarse classification used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, connection failure, or non-success status.
    Transient,
    /// The response arrived but did not have the expected shape.
    Malformed,
}

impl BackendError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::Status(_) => FailureKind::Transient,
            Self::Malformed(_) => FailureKind::Malformed,
        }
    }

    fn from_reqwest(err: &reqwest::Error, limit: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(limit)
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// The two calls the client makes against its backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the stored conversation for `user_id`, oldest first.
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>, BackendError>;

    /// Send a prompt and return the assistant's reply.
    async fn ask(&self, prompt: &str, user_id: &str) -> Result<String, BackendError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>, BackendError> {
        (**self).fetch_history(user_id).await
    }

    async fn ask(&self, prompt: &str, user_id: &str) -> Result<String, BackendError> {
        (**self).ask(prompt, user_id).await
    }
}

/// Run a backend future with a deadline, mapping expiry to [`BackendError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Option<Vec<Message>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest<'a> {
    prompt: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    reply: String,
}

/// Backend reached over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    history_timeout: Duration,
    ask_timeout: Duration,
}

impl HttpBackend {
    /// Build a client from configuration.
    ///
    /// With `send_credentials` enabled the client keeps a cookie jar, so any
    /// session cookie set by the backend is sent back on later calls.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        let client = Client::builder()
            .cookie_store(config.send_credentials)
            .connect_timeout(config.history_timeout())
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            history_timeout: config.history_timeout(),
            ask_timeout: config.ask_timeout(),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, limit: Duration) -> Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(limit)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, limit))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::from_reqwest(&e, limit))?;
        serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>, BackendError> {
        let response: HistoryResponse = self
            .post_json("/api/history", &HistoryRequest { user_id }, self.history_timeout)
            .await?;
        Ok(response.messages.unwrap_or_default())
    }

    async fn ask(&self, prompt: &str, user_id: &str) -> Result<String, BackendError> {
        let response: AskResponse = self
            .post_json("/api/ask", &AskRequest { prompt, user_id }, self.ask_timeout)
            .await?;
        Ok(response.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Serve `router` on an ephemeral loopback port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn backend_for(base_url: &str) -> HttpBackend {
        let config = Config {
            base_url: base_url.to_string(),
            history_timeout_secs: 2,
            ask_timeout_secs: 2,
            ..Default::default()
        };
        HttpBackend::from_config(&config).unwrap()
    }

    #[test]
    fn test_request_bodies_use_camel_case() {
        let history = serde_json::to_value(HistoryRequest { user_id: "u1" }).unwrap();
        assert_eq!(history, json!({"userId": "u1"}));

        let ask = serde_json::to_value(AskRequest {
            prompt: "hello",
            user_id: "u1",
        })
        .unwrap();
        assert_eq!(ask, json!({"prompt": "hello", "userId": "u1"}));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Transient
        );
        assert_eq!(BackendError::Status(500).kind(), FailureKind::Transient);
        assert_eq!(
            BackendError::Malformed("x".into()).kind(),
            FailureKind::Malformed
        );
    }

    #[tokio::test]
    async fn test_fetch_history_parses_messages() {
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let seen_clone = Arc::clone(&seen);
        let router = Router::new().route(
            "/api/history",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({"messages": [
                        {"role": "user", "content": "hi"},
                        {"role": "assistant", "content": "hello"}
                    ]}))
                }
            }),
        );
        let backend = backend_for(&serve(router).await);

        let messages = backend.fetch_history("user-1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("hi"));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(seen.lock().unwrap()[0], json!({"userId": "user-1"}));
    }

    #[tokio::test]
    async fn test_fetch_history_missing_messages_is_empty() {
        let router = Router::new().route("/api/history", post(|| async { Json(json!({})) }));
        let backend = backend_for(&serve(router).await);

        assert!(backend.fetch_history("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_history_null_messages_is_empty() {
        let router = Router::new().route(
            "/api/history",
            post(|| async { Json(json!({"messages": null})) }),
        );
        let backend = backend_for(&serve(router).await);

        assert!(backend.fetch_history("u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ask_returns_reply() {
        let router = Router::new().route(
            "/api/ask",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["prompt"], "hello");
                assert_eq!(body["userId"], "u");
                Json(json!({"reply": "hi there"}))
            }),
        );
        let backend = backend_for(&serve(router).await);

        assert_eq!(backend.ask("hello", "u").await.unwrap(), "hi there");
    }

    #[tokio::test]
    async fn test_ask_missing_reply_is_malformed() {
        let router = Router::new().route("/api/ask", post(|| async { Json(json!({"answer": "x"})) }));
        let backend = backend_for(&serve(router).await);

        let err = backend.ask("hello", "u").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Malformed);
    }

    #[tokio::test]
    async fn test_ask_non_json_body_is_malformed() {
        let router = Router::new().route("/api/ask", post(|| async { "<html>oops</html>" }));
        let backend = backend_for(&serve(router).await);

        assert!(matches!(
            backend.ask("hello", "u").await,
            Err(BackendError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_ask_server_error_status() {
        let router = Router::new().route(
            "/api/ask",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let backend = backend_for(&serve(router).await);

        assert_eq!(
            backend.ask("hello", "u").await.unwrap_err(),
            BackendError::Status(500)
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend_for(&format!("http://{addr}"));
        let err = backend.fetch_history("u").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<(), BackendError> = bounded(Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(BackendError::Timeout(Duration::from_secs(30))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_passes_through_result() {
        let result = bounded(Duration::from_secs(30), async { Ok::<_, BackendError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
