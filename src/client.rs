//! HTTP client for the grammar-analysis service.
//!
//! Every call belongs to an action (build or parse). Starting a new call for
//! an action cancels the one still in flight for it, so callers never see a
//! stale response land after a fresher one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::*;

pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const SERVICE_URL_ENV: &str = "LR1VIEW_SERVICE_URL";
pub const TIMEOUT_ENV: &str = "LR1VIEW_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Transport(String),
    #[error("Server error: {0}")]
    Status(u16),
    #[error("malformed service response: {0}")]
    Malformed(String),
    #[error("request was superseded by a newer one")]
    Superseded,
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ServiceConfig {
    /// Defaults overridden by `LR1VIEW_SERVICE_URL` and `LR1VIEW_TIMEOUT_SECS`.
    /// Unparseable timeouts fall back to the default.
    pub fn from_env() -> Self {
        let base_url = std::env::var(SERVICE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        let timeout_secs = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Build,
    Parse,
}

impl ServiceAction {
    pub fn name(self) -> &'static str {
        match self {
            ServiceAction::Build => "build",
            ServiceAction::Parse => "parse",
        }
    }
}

struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Control side of a cancellation signal. Dropping it does not cancel.
struct CancellationSource {
    inner: Arc<CancellationInner>,
}

#[derive(Clone)]
struct CancellationToken {
    inner: Arc<CancellationInner>,
}

impl CancellationSource {
    fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

impl CancellationToken {
    fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a cancel in between is not lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Holds the source for the newest in-flight request of one action.
#[derive(Default)]
struct ActionSlot {
    current: Mutex<Option<CancellationSource>>,
}

impl ActionSlot {
    fn begin(&self) -> CancellationToken {
        let source = CancellationSource::new();
        let token = source.token();
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            current.replace(source)
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }
}

#[derive(Serialize)]
struct BuildRequest<'a> {
    grammar: &'a str,
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    grammar: &'a str,
    input: &'a str,
}

#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    config: ServiceConfig,
    build_slot: Arc<ActionSlot>,
    parse_slot: Arc<ActionSlot>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            config,
            build_slot: Arc::default(),
            parse_slot: Arc::default(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn build(&self, grammar: &str) -> Result<BuildResponse, ServiceError> {
        if grammar.trim().is_empty() {
            return Err(ServiceError::EmptyInput("grammar"));
        }

        let token = self.build_slot.begin();
        let body = BuildRequest { grammar };
        let request = self.post::<_, BuildResponse>("build", &body);
        let response = run_cancellable(ServiceAction::Build, token, request).await?;
        response
            .validate()
            .map_err(|err| ServiceError::Malformed(err.to_string()))?;

        info!(
            states = response.states.len(),
            initial = %response.initial,
            "automaton built"
        );
        Ok(response)
    }

    pub async fn parse(&self, grammar: &str, input: &str) -> Result<ParseResponse, ServiceError> {
        if grammar.trim().is_empty() {
            return Err(ServiceError::EmptyInput("grammar"));
        }
        if input.trim().is_empty() {
            return Err(ServiceError::EmptyInput("input"));
        }

        let token = self.parse_slot.begin();
        let body = ParseRequest { grammar, input };
        let request = self.post::<_, ParseResponse>("parse", &body);
        let response = run_cancellable(ServiceAction::Parse, token, request).await?;
        response
            .validate()
            .map_err(|err| ServiceError::Malformed(err.to_string()))?;

        info!(
            accepted = response.accepted,
            steps = response.trace.len(),
            "input parsed"
        );
        Ok(response)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.config.endpoint(path);
        info!(%url, "sending request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        info!(%url, status = status.as_u16(), "service responded");
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| ServiceError::Malformed(err.to_string()))
    }
}

async fn run_cancellable<T, F>(
    action: ServiceAction,
    token: CancellationToken,
    request: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            warn!(action = action.name(), "request superseded by a newer one");
            Err(ServiceError::Superseded)
        }
        result = request => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = ServiceConfig::from_env().with_base_url("http://localhost:9000/");
        assert_eq!(config.endpoint("build"), "http://localhost:9000/build");
    }

    #[test]
    fn status_errors_show_only_the_code() {
        assert_eq!(ServiceError::Status(500).to_string(), "Server error: 500");
        assert_eq!(ServiceError::Status(404).to_string(), "Server error: 404");
    }

    #[tokio::test]
    async fn starting_a_request_cancels_the_previous_one() {
        let slot = ActionSlot::default();
        let first = slot.begin();
        assert!(!first.is_cancelled());

        let second = slot.begin();
        first.cancelled().await;
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn blank_input_is_rejected_locally() {
        let client = ServiceClient::new(
            ServiceConfig::from_env().with_base_url("http://127.0.0.1:9"),
        )
        .unwrap();

        assert!(matches!(
            client.build("   \n").await,
            Err(ServiceError::EmptyInput("grammar"))
        ));
        assert!(matches!(
            client.parse("S -> a", "").await,
            Err(ServiceError::EmptyInput("input"))
        ));
    }

    #[cfg(feature = "server")]
    mod against_mock_service {
        use super::*;
        use axum::response::{IntoResponse, Response};
        use axum::routing::post;
        use axum::{Json, Router, http::StatusCode};
        use serde_json::{Value, json};

        fn sample_build() -> Value {
            json!({
                "initial": "S'",
                "terminals": ["a", "$"],
                "nonterminals": ["S"],
                "states": [
                    {"id": 0, "items": ["S' -> . S, $", "S -> . a, $"], "transitions": [{"symbol": "S", "to": 1}, {"symbol": "a", "to": 2}]},
                    {"id": 1, "items": ["S' -> S ., $"], "transitions": []},
                    {"id": 2, "items": ["S -> a ., $"], "transitions": []}
                ],
                "tables": {
                    "action": {
                        "0": {"a": {"type": "shift", "to": 2}},
                        "1": {"$": {"type": "accept"}},
                        "2": {"$": {"type": "reduce", "lhs": "S", "rhs": ["a"], "text": "S -> a"}}
                    },
                    "goto": {"0": {"S": 1}},
                    "terminals": ["a", "$"],
                    "nonterminals": ["S"]
                }
            })
        }

        async fn mock_build(Json(body): Json<Value>) -> Response {
            match body["grammar"].as_str().unwrap_or_default() {
                "boom" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                "garbage" => Json(json!({"initial": "S", "states": "nope"})).into_response(),
                "dupe" => Json(json!({"initial": "S", "states": [{"id": 0}, {"id": 0}]}))
                    .into_response(),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(sample_build()).into_response()
                }
                _ => Json(sample_build()).into_response(),
            }
        }

        async fn mock_parse(Json(body): Json<Value>) -> Response {
            let accepted = body["input"].as_str() == Some("a");
            Json(json!({
                "accepted": accepted,
                "trace": [
                    {"stackStates": [0], "stackSymbols": [], "input": "a $", "action": {"type": "shift", "to": 2, "symbol": "a"}},
                    {"stackStates": [0, 2], "stackSymbols": ["a"], "input": "$", "action": {"type": "reduce", "production": {"lhs": "S", "rhs": ["a"], "text": "S -> a"}}}
                ],
                "tree_ascii": "S\n└── a"
            }))
            .into_response()
        }

        async fn spawn_mock() -> ServiceClient {
            let app = Router::new()
                .route("/build", post(mock_build))
                .route("/parse", post(mock_parse));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            ServiceClient::new(
                ServiceConfig::from_env()
                    .with_base_url(format!("http://{addr}"))
                    .with_timeout(Duration::from_secs(10)),
            )
            .unwrap()
        }

        #[tokio::test]
        async fn build_decodes_typed_response() {
            let client = spawn_mock().await;
            let response = client.build("S -> a").await.unwrap();

            assert_eq!(response.initial, "S'");
            assert_eq!(response.states.len(), 3);
            assert_eq!(response.tables.action["1"]["$"], TableAction::Accept);
        }

        #[tokio::test]
        async fn parse_decodes_trace_actions() {
            let client = spawn_mock().await;
            let response = client.parse("S -> a", "a").await.unwrap();

            assert!(response.accepted);
            assert_eq!(response.trace[0].action.describe(), "shift 2");
            assert_eq!(response.trace[1].action.describe(), "reduce S -> a");
        }

        #[tokio::test]
        async fn non_success_status_is_reported_without_body() {
            let client = spawn_mock().await;
            let err = client.build("boom").await.unwrap_err();

            assert!(matches!(err, ServiceError::Status(500)));
            assert_eq!(err.to_string(), "Server error: 500");
        }

        #[tokio::test]
        async fn undecodable_bodies_are_malformed() {
            let client = spawn_mock().await;

            assert!(matches!(
                client.build("garbage").await,
                Err(ServiceError::Malformed(_))
            ));
            assert!(matches!(
                client.build("dupe").await,
                Err(ServiceError::Malformed(_))
            ));
        }

        #[tokio::test]
        async fn unreachable_service_is_a_transport_error() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let client =
                ServiceClient::new(ServiceConfig::from_env().with_base_url(format!("http://{addr}")))
                    .unwrap();
            assert!(matches!(
                client.build("S -> a").await,
                Err(ServiceError::Transport(_))
            ));
        }

        #[tokio::test]
        async fn newer_build_supersedes_older_one() {
            let client = spawn_mock().await;

            let slow = {
                let client = client.clone();
                tokio::spawn(async move { client.build("slow").await })
            };
            tokio::time::sleep(Duration::from_millis(100)).await;

            let fresh = client.build("S -> a").await.unwrap();
            assert_eq!(fresh.states.len(), 3);
            assert!(matches!(slow.await.unwrap(), Err(ServiceError::Superseded)));
        }
    }
}
