use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::{HeaderValue, header};
use axum::response::{Html, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::*;

const VIEWER_HTML: &str = include_str!("../assets/viewer.html");

/// Arguments for running the lr1view web viewer
#[derive(Debug, Clone, Parser)]
#[command(name = "lr1view serve", about = "Start the lr1view web viewer.")]
pub struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5252)]
    pub port: u16,

    /// Background color for rendered SVG previews.
    #[arg(long = "background-color", default_value = "white")]
    pub background_color: String,

    /// Base URL of the grammar-analysis service.
    #[arg(long = "service-url")]
    pub service_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory holding the persisted session.
    #[arg(long = "state-dir")]
    pub state_dir: Option<PathBuf>,
}

impl ServeArgs {
    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::from_env();
        if let Some(url) = &self.service_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn store_config(&self) -> StoreConfig {
        match &self.state_dir {
            Some(dir) => StoreConfig { dir: dir.clone() },
            None => StoreConfig::from_env(),
        }
    }
}

pub struct ServeState {
    background: String,
    client: ServiceClient,
    store: Arc<dyn SessionStore>,
    session: RwLock<Session>,
    viewport: ViewportHandle,
}

impl ServeState {
    /// Loads the persisted session and starts the viewport task.
    pub fn new(
        background: impl Into<String>,
        client: ServiceClient,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let session = Session::load(store.as_ref()).context("failed to load saved session")?;
        Ok(Self {
            background: background.into(),
            client,
            store,
            session: RwLock::new(session),
            viewport: ViewportHandle::spawn(),
        })
    }

    async fn graph(&self) -> StateGraph {
        self.session.read().await.graph()
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        session
            .save(self.store.as_ref())
            .context("failed to persist session")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphPayload {
    background: String,
    size: CanvasSize,
    nodes: Vec<PositionedNode>,
    edges: Vec<RoutedEdge>,
    viewport: ViewportPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewportPayload {
    #[serde(flatten)]
    state: ViewportState,
    mode: PanMode,
    transform: String,
    zoom_percent: u32,
}

impl From<ViewportState> for ViewportPayload {
    fn from(state: ViewportState) -> Self {
        Self {
            mode: state.mode(),
            transform: state.transform(),
            zoom_percent: state.zoom_percent(),
            state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildRequestBody {
    grammar: String,
}

#[derive(Debug, Deserialize)]
struct ParseRequestBody {
    input: String,
    #[serde(default)]
    grammar: Option<String>,
}

pub fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/", get(get_viewer))
        .route("/api/graph", get(get_graph))
        .route("/api/graph/svg", get(get_svg))
        .route("/api/viewport", post(post_viewport))
        .route("/api/session", get(get_session))
        .route("/api/build", post(post_build))
        .route("/api/parse", post(post_parse))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn run_serve(
    args: ServeArgs,
    client: ServiceClient,
    store: Arc<dyn SessionStore>,
) -> Result<()> {
    let state = Arc::new(ServeState::new(
        args.background_color.clone(),
        client,
        store,
    )?);
    let app = router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    info!(%addr, service = %args.service_config().base_url, "viewer started");
    println!("lr1view viewer listening on http://{addr}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn get_viewer() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

async fn get_graph(State(state): State<Arc<ServeState>>) -> Json<GraphPayload> {
    let graph = state.graph().await;
    Json(GraphPayload {
        background: state.background.clone(),
        size: graph.size(),
        nodes: graph.layout.nodes,
        edges: graph.edges,
        viewport: state.viewport.current().into(),
    })
}

async fn get_svg(State(state): State<Arc<ServeState>>) -> Result<Response, (StatusCode, String)> {
    let graph = state.graph().await;
    let viewport = state.viewport.current();
    let svg = graph
        .render_svg(&state.background, Some(&viewport))
        .map_err(internal_error)?;

    let mut response = Response::new(svg.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Ok(response)
}

async fn post_viewport(
    State(state): State<Arc<ServeState>>,
    Json(event): Json<ViewportEvent>,
) -> Result<Json<ViewportPayload>, (StatusCode, String)> {
    let updated = state
        .viewport
        .send(event)
        .await
        .map_err(|err| internal_error(err.into()))?;
    Ok(Json(updated.into()))
}

async fn get_session(State(state): State<Arc<ServeState>>) -> Json<Session> {
    Json(state.session.read().await.clone())
}

async fn post_build(
    State(state): State<Arc<ServeState>>,
    Json(body): Json<BuildRequestBody>,
) -> Result<Json<BuildResponse>, (StatusCode, String)> {
    let build = state
        .client
        .build(&body.grammar)
        .await
        .map_err(service_error)?;

    let mut session = state.session.write().await;
    session.record_build(body.grammar, build.clone());
    state.persist(&session).await.map_err(internal_error)?;
    Ok(Json(build))
}

async fn post_parse(
    State(state): State<Arc<ServeState>>,
    Json(body): Json<ParseRequestBody>,
) -> Result<Json<ParseResponse>, (StatusCode, String)> {
    let grammar = match body.grammar {
        Some(grammar) => grammar,
        None => state.session.read().await.grammar.clone(),
    };

    let parse = state
        .client
        .parse(&grammar, &body.input)
        .await
        .map_err(service_error)?;

    let mut session = state.session.write().await;
    session.record_parse(parse.clone());
    state.persist(&session).await.map_err(internal_error)?;
    Ok(Json(parse))
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn service_error(err: ServiceError) -> (StatusCode, String) {
    let status = match &err {
        ServiceError::EmptyInput(_) => StatusCode::BAD_REQUEST,
        ServiceError::Superseded => StatusCode::CONFLICT,
        ServiceError::Status(_) | ServiceError::Transport(_) | ServiceError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn seeded_state() -> Arc<ServeState> {
        let store = MemoryStore::new();
        store.set(GRAMMAR_KEY, "\"S -> a\"").unwrap();
        store
            .set(
                BUILD_KEY,
                &json!({
                    "initial": "S'",
                    "states": [
                        {"id": 0, "items": ["S' -> . S, $"], "transitions": [{"symbol": "S", "to": 1}, {"symbol": "a", "to": 2}]},
                        {"id": 1, "items": ["S' -> S ., $"]},
                        {"id": 2, "items": ["S -> a ., $"]}
                    ]
                })
                .to_string(),
            )
            .unwrap();

        // Port 9 is discard; nothing in these tests reaches the service.
        let client = ServiceClient::new(
            ServiceConfig::from_env().with_base_url("http://127.0.0.1:9"),
        )
        .unwrap();
        Arc::new(ServeState::new("white", client, Arc::new(store)).unwrap())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn graph_route_returns_positioned_scene() {
        let app = router(seeded_state());
        let response = app
            .oneshot(Request::builder().uri("/api/graph").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payload = body_json(response).await;
        assert_eq!(payload["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(payload["edges"].as_array().unwrap().len(), 2);
        assert_eq!(payload["nodes"][0]["isInitial"], json!(true));
        assert_eq!(payload["viewport"]["zoomPercent"], json!(100));
        assert_eq!(payload["size"]["width"], json!(1000.0));
    }

    #[tokio::test]
    async fn svg_route_sets_content_type() {
        let app = router(seeded_state());
        let response = app
            .oneshot(Request::builder().uri("/api/graph/svg").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/svg+xml"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let svg = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(svg.contains("State 2"));
        assert!(svg.contains("translate(0, 0) scale(1)"));
    }

    #[tokio::test]
    async fn viewport_events_update_shared_state() {
        let state = seeded_state();

        let response = router(state.clone())
            .oneshot(post_json("/api/viewport", json!({"type": "zoomIn"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response).await;
        assert_eq!(payload["zoomPercent"], json!(120));
        assert_eq!(payload["transform"], json!("translate(0, 0) scale(1.2)"));

        router(state.clone())
            .oneshot(post_json(
                "/api/viewport",
                json!({"type": "pointerDown", "x": 100, "y": 100}),
            ))
            .await
            .unwrap();
        let response = router(state.clone())
            .oneshot(post_json(
                "/api/viewport",
                json!({"type": "pointerMove", "x": 150, "y": 120}),
            ))
            .await
            .unwrap();
        let payload = body_json(response).await;
        assert_eq!(payload["pan"], json!({"x": 50.0, "y": 20.0}));
        assert_eq!(payload["mode"], json!("panning"));
    }

    #[tokio::test]
    async fn session_route_exposes_cached_state() {
        let app = router(seeded_state());
        let response = app
            .oneshot(Request::builder().uri("/api/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let payload = body_json(response).await;

        assert_eq!(payload["grammar"], json!("S -> a"));
        assert_eq!(payload["build"]["initial"], json!("S'"));
        assert!(payload["parse"].is_null());
    }

    #[tokio::test]
    async fn blank_build_is_a_bad_request() {
        let app = router(seeded_state());
        let response = app
            .oneshot(post_json("/api/build", json!({"grammar": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn viewer_page_is_served() {
        let app = router(seeded_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/viewport"));
    }

    #[test]
    fn service_errors_map_to_gateway_statuses() {
        assert_eq!(service_error(ServiceError::Status(500)).0, StatusCode::BAD_GATEWAY);
        assert_eq!(
            service_error(ServiceError::Status(500)).1,
            "Server error: 500"
        );
        assert_eq!(service_error(ServiceError::Superseded).0, StatusCode::CONFLICT);
    }
}
