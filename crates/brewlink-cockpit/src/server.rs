//! [`CockpitServer`] – HTTP surface of the bridge.
//!
//! | Route | |
//! |---|---|
//! | `GET /` | Embedded chat page. |
//! | `GET /status` | Current [`DeviceState`] snapshot as JSON. |
//! | `POST /chat` | `{"message", "conversation_id"}` → conversational reply plus a `device` report. |
//!
//! A failed conversational call answers `502 Bad Gateway` with
//! `{"error": "..."}`. Request bodies that are not valid JSON are refused by
//! the extractor before any handler runs.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use brewlink_runtime::{CommandOutcome, ConversationReply, Dispatcher};
use brewlink_types::{BrewError, DeviceState};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Default TCP port for the HTTP surface.
pub const DEFAULT_PORT: u16 = 5000;

const COCKPIT_HTML: &str = include_str!("cockpit.html");

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Body of a successful `POST /chat`: the reply's own fields at the top
/// level, with what happened to the appliance under `device`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub reply: ConversationReply,
    pub device: DeviceReport,
}

#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub command: Option<&'static str>,
    pub published: bool,
    pub publish_error: Option<String>,
    pub state: Option<DeviceState>,
}

impl From<CommandOutcome> for ChatResponse {
    fn from(outcome: CommandOutcome) -> Self {
        Self {
            reply: outcome.reply,
            device: DeviceReport {
                command: outcome.command,
                published: outcome.published,
                publish_error: outcome.publish_error,
                state: outcome.state,
            },
        }
    }
}

/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use brewlink_runtime::Dispatcher;
/// use brewlink_cockpit::CockpitServer;
///
/// # async fn demo(dispatcher: Arc<Dispatcher>) -> Result<(), brewlink_types::BrewError> {
/// CockpitServer::new(dispatcher)
///     .with_port(8080)
///     .run(async { let _ = tokio::signal::ctrl_c().await; })
///     .await
/// # }
/// ```
pub struct CockpitServer {
    dispatcher: Arc<Dispatcher>,
    bind: IpAddr,
    port: u16,
}

impl CockpitServer {
    /// Server on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Routes with CORS applied, ready to serve.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/status", get(status))
            .route("/chat", post(chat))
            .layer(CorsLayer::permissive())
            .with_state(AppState {
                dispatcher: Arc::clone(&self.dispatcher),
            })
    }

    /// Bind and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// [`BrewError::Connection`] if the address cannot be bound or the
    /// listener fails.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BrewError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrewError::Connection(format!("bind error on {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BrewError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(local) = listener.local_addr() {
            info!(%local, "HTTP surface listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| BrewError::Connection(format!("HTTP server error: {e}")))?;
        info!("HTTP surface stopped");
        Ok(())
    }
}

async fn index() -> Html<&'static str> {
    Html(COCKPIT_HTML)
}

async fn status(State(app): State<AppState>) -> Json<DeviceState> {
    Json(app.dispatcher.store().read().await)
}

async fn chat(State(app): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    debug!(message = %request.message, "chat request");
    let conversation_id = request.conversation_id.as_deref().filter(|id| !id.is_empty());
    match app.dispatcher.chat(&request.message, conversation_id).await {
        Ok(outcome) => Json(ChatResponse::from(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &BrewError) -> Response {
    let status = match e {
        BrewError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
