//! ---
//! hma_section: "05-networking-external-interfaces"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "HTTP surface for named states and operator alerts."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Form, Json, Router};
use hmauto_alert::{AlertError, AlertRequest, AlertService};
use hmauto_state::{State as NamedState, StateError, StateService};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Body returned by `getstatevalue` when the state cannot be read.
pub const VALUE_ERROR_BODY: &str = "ERR";

/// Shared API state exposed to handlers.
pub struct ApiState {
    states: Arc<StateService>,
    alerts: Arc<AlertService>,
    start: Instant,
}

impl ApiState {
    pub fn new(states: Arc<StateService>, alerts: Arc<AlertService>) -> Self {
        Self {
            states,
            alerts,
            start: Instant::now(),
        }
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: self.start.elapsed().as_secs(),
        }
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("states", &self.states)
            .field("alerts", &self.alerts)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Routes for the state and alert endpoints.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/hmstt/states", get(list_states))
        .route("/hmstt/getstatevalue/:state_type/:key", get(get_state_value))
        .route("/hmstt/state/:state_type/:key", get(get_state_detail))
        .route("/hmstt/setstate/:state_type/:key", post(set_state))
        .route("/hmalert/publish", get(publish_alert_query).post(publish_alert_json))
        .route("/hmalert/publishbatch", post(publish_alert_batch))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve [`router`] until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %local_addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %local_addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

/// Acknowledgement for alert publishes.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishAck {
    pub accepted: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Deserialize)]
struct SetStateRequest {
    #[serde(default)]
    value: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        let status = match &err {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        let status = match err {
            AlertError::UnknownLevel(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// `value` from either a JSON or a url-encoded form body.
struct SetStateBody(SetStateRequest);

#[async_trait]
impl<S> FromRequest<S> for SetStateBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            let Form(body) = Form::<SetStateRequest>::from_request(req, state)
                .await
                .map_err(|err: FormRejection| {
                    ApiError::new(StatusCode::BAD_REQUEST, err.body_text())
                })?;
            Ok(Self(body))
        } else {
            let Json(body) = Json::<SetStateRequest>::from_request(req, state)
                .await
                .map_err(|err: JsonRejection| {
                    ApiError::new(StatusCode::BAD_REQUEST, err.body_text())
                })?;
            Ok(Self(body))
        }
    }
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(state.status())
}

async fn list_states(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<NamedState>>, ApiError> {
    Ok(Json(state.states.list_states().await?))
}

async fn get_state_value(
    State(state): State<Arc<ApiState>>,
    Path((state_type, key)): Path<(String, String)>,
) -> Response {
    match state.states.get_state(&state_type, &key).await {
        Ok(value) => value.into_response(),
        Err(err) => {
            debug!(state_type = %state_type, key = %key, error = %err, "state value unavailable");
            (StatusCode::NOT_FOUND, VALUE_ERROR_BODY).into_response()
        }
    }
}

async fn get_state_detail(
    State(state): State<Arc<ApiState>>,
    Path((state_type, key)): Path<(String, String)>,
) -> Result<Json<NamedState>, ApiError> {
    Ok(Json(state.states.get_state_detail(&state_type, &key).await?))
}

async fn set_state(
    State(state): State<Arc<ApiState>>,
    Path((state_type, key)): Path<(String, String)>,
    SetStateBody(body): SetStateBody,
) -> Result<Json<NamedState>, ApiError> {
    if body.value.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "value is required"));
    }
    let updated = state
        .states
        .set_state(&state_type, &key, &body.value)
        .await
        .map_err(|err| {
            if !err.is_validation() {
                warn!(state_type = %state_type, key = %key, error = %err, "state write failed");
            }
            ApiError::from(err)
        })?;
    Ok(Json(updated))
}

async fn publish_alert_query(
    State(state): State<Arc<ApiState>>,
    Query(request): Query<AlertRequest>,
) -> Result<Json<PublishAck>, ApiError> {
    publish_one(&state, request).await
}

async fn publish_alert_json(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AlertRequest>,
) -> Result<Json<PublishAck>, ApiError> {
    publish_one(&state, request).await
}

async fn publish_one(state: &ApiState, request: AlertRequest) -> Result<Json<PublishAck>, ApiError> {
    state.alerts.publish(&request).await?;
    Ok(Json(PublishAck {
        accepted: 1,
        failed: 0,
    }))
}

async fn publish_alert_batch(
    State(state): State<Arc<ApiState>>,
    Json(requests): Json<Vec<AlertRequest>>,
) -> (StatusCode, Json<PublishAck>) {
    let report = state.alerts.publish_batch(&requests).await;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(PublishAck {
            accepted: report.accepted,
            failed: report.failures.len(),
        }),
    )
}
