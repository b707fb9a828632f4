use crate::bus::BusHandle;
use crate::traits::WifiCredentials;
use crate::wpa::WpaConnectionManager;
use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// The shared state for our web server.
pub type WebServerState = State<Arc<AppState>>;

pub struct AppState {
    pub wpa: Arc<WpaConnectionManager>,
    /// Used only to post the `kill` pseudo-event.
    pub bus: BusHandle,
}

/// Envelope for every response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiReturn<T> {
    pub status: String,
    pub message: String,
    pub payload: Option<T>,
}

fn ok<T: Serialize>(message: &str, payload: Option<T>) -> Response {
    let body = ApiReturn {
        status: "OK".to_string(),
        message: message.to_string(),
        payload,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn fail(err: crate::Error) -> Response {
    tracing::error!(error = %err, "request failed");
    let body = ApiReturn::<()> {
        status: "FAIL".to_string(),
        message: err.to_string(),
        payload: None,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Builds the control-surface router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ]);

    Router::new()
        .route("/status", get(api_status))
        .route("/connect", post(api_connect))
        .route("/scan", get(api_scan))
        .route("/kill", get(api_kill).post(api_kill))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves the router on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> crate::Result<()> {
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

/// Starts the Axum web server.
///
/// # Returns
/// A `JoinHandle` for the server task.
pub fn start_web_server(addr: SocketAddr, state: Arc<AppState>) -> JoinHandle<crate::Result<()>> {
    tokio::spawn(async move {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("🌐 HTTP listening on {}", addr);
        serve(listener, state).await
    })
}

// --- Route Handlers ---

async fn api_status(State(state): WebServerState) -> Response {
    match state.wpa.status().await {
        Ok(status) => ok("status", Some(status)),
        Err(e) => fail(e),
    }
}

async fn api_connect(
    State(state): WebServerState,
    Json(creds): Json<WifiCredentials>,
) -> Response {
    tracing::info!(ssid = %creds.ssid, "connect requested");
    match state.wpa.connect(&creds).await {
        Ok(connection) => ok("Connection", Some(connection)),
        Err(e) => fail(e),
    }
}

async fn api_scan(State(state): WebServerState) -> Response {
    match state.wpa.scan().await {
        Ok(networks) => ok("Networks", Some(networks)),
        Err(e) => fail(e),
    }
}

async fn api_kill(State(state): WebServerState) -> Response {
    tracing::warn!("kill requested over HTTP");
    state.bus.request_kill();
    ok::<()>("Killing service.", None)
}
