use crate::dispatch::{OutboundDispatcher, OutboundPayload};
use crate::error::RelayError;
use crate::session::{SessionManager, SessionState};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};


/// Shared state for bridge handlers
#[derive(Clone)]
pub struct BridgeState {
    pub session: Arc<SessionManager>,
    pub dispatcher: Arc<OutboundDispatcher>,
}

/// POST /send body
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub number: String,
    pub message: String,
}

/// POST /send-media body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest {
    pub number: String,
    pub media_path: PathBuf,
    #[serde(default)]
    pub caption: Option<String>,
}

/// POST /broadcast body: either `message` or `mediaPath` (+ `caption`)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub numbers: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media_path: Option<PathBuf>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingResponse {
    /// Pairing code to render as a QR image, while awaiting authorization
    pub artifact: Option<String>,
    pub ready: bool,
    pub state: SessionState,
}

/// GET /qr body; `qr` repeats the artifact under the dashboard's field name
#[derive(Debug, Serialize, Deserialize)]
pub struct QrResponse {
    pub qr: Option<String>,
    pub artifact: Option<String>,
    pub ready: bool,
    pub state: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub state: SessionState,
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub number: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub results: Vec<BroadcastResult>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

/// Create bridge API router.
///
/// Cross-origin requests are only answered for `allowed_origins`; with an
/// empty list no CORS headers are sent at all.
pub fn create_bridge_router(state: BridgeState, allowed_origins: &[String]) -> Router {
    let mut router = Router::new()
        .route("/pairing", get(pairing_status))
        .route("/qr", get(qr_status))
        .route("/health", get(health))
        .route("/initialize", post(initialize))
        .route("/send", post(send_text))
        .route("/send-media", post(send_media))
        .route("/broadcast", post(broadcast));

    if let Some(cors) = cors_layer(allowed_origins) {
        router = router.layer(cors);
    }
    router.with_state(Arc::new(state))
}

fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }
    info!(origins = ?allowed_origins, "CORS enabled for configured origins");
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

fn pairing_response(session: &SessionManager) -> PairingResponse {
    let status = session.status();
    PairingResponse {
        ready: status.is_ready(),
        artifact: status.pending_artifact,
        state: status.state,
    }
}

/// GET /pairing - pairing artifact and readiness
async fn pairing_status(State(state): State<Arc<BridgeState>>) -> Json<PairingResponse> {
    Json(pairing_response(&state.session))
}

/// GET /qr - same as /pairing with the artifact also under `qr`
async fn qr_status(State(state): State<Arc<BridgeState>>) -> Json<QrResponse> {
    let pairing = pairing_response(&state.session);
    Json(QrResponse {
        qr: pairing.artifact.clone(),
        artifact: pairing.artifact,
        ready: pairing.ready,
        state: pairing.state,
    })
}

/// POST /initialize - open the session again after it went back to UNINITIALIZED
async fn initialize(
    State(state): State<Arc<BridgeState>>,
) -> Result<Json<PairingResponse>, BridgeError> {
    state.session.initialize().await?;
    let response = pairing_response(&state.session);
    info!(state = ?response.state, "Session initialize requested");
    Ok(Json(response))
}

/// GET /health
async fn health(State(state): State<Arc<BridgeState>>) -> Json<HealthResponse> {
    let status = state.session.status();
    Json(HealthResponse {
        ready: status.is_ready(),
        state: status.state,
    })
}

/// POST /send - text notification
async fn send_text(
    State(state): State<Arc<BridgeState>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, BridgeError> {
    let Json(request) = body?;
    let payload = OutboundPayload::Text(request.message);

    let address = state.dispatcher.send(&request.number, &payload).await?;
    info!(recipient = %address, "Text notification sent");

    Ok(Json(SendResponse { success: true }))
}

/// POST /send-media - file from local disk with optional caption
async fn send_media(
    State(state): State<Arc<BridgeState>>,
    body: Result<Json<SendMediaRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, BridgeError> {
    let Json(request) = body?;
    let payload = OutboundPayload::Media {
        path: request.media_path,
        caption: request.caption,
    };

    let address = state.dispatcher.send(&request.number, &payload).await?;
    info!(recipient = %address, "Media notification sent");

    Ok(Json(SendResponse { success: true }))
}

/// POST /broadcast - same payload to many recipients
async fn broadcast(
    State(state): State<Arc<BridgeState>>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, BridgeError> {
    let Json(request) = body?;

    let payload = match (request.message, request.media_path) {
        (Some(message), None) => OutboundPayload::Text(message),
        (None, Some(path)) => OutboundPayload::Media {
            path,
            caption: request.caption,
        },
        _ => {
            return Err(BridgeError::BadRequest(
                "exactly one of 'message' or 'mediaPath' is required".to_string(),
            ))
        }
    };

    let results = state
        .dispatcher
        .broadcast(&request.numbers, &payload)
        .await
        .into_iter()
        .map(|report| match report.result {
            Ok(_) => BroadcastResult {
                number: report.number,
                success: true,
                error: None,
                code: None,
            },
            Err(e) => BroadcastResult {
                number: report.number,
                success: false,
                code: Some(e.code().to_string()),
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(BroadcastResponse { results }))
}

/// Bridge API error types
#[derive(Debug)]
enum BridgeError {
    BadRequest(String),
    Relay(RelayError),
}

impl From<RelayError> for BridgeError {
    fn from(e: RelayError) -> Self {
        BridgeError::Relay(e)
    }
}

impl From<JsonRejection> for BridgeError {
    fn from(rejection: JsonRejection) -> Self {
        BridgeError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            BridgeError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                format!("BAD_REQUEST: {}", detail),
            ),
            BridgeError::Relay(e) => {
                let status = match e {
                    RelayError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                    RelayError::UnregisteredRecipient(_) | RelayError::MediaUnavailable(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    RelayError::TransportUnavailable(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code(), e.to_string())
            }
        };

        warn!(status = %status, error = %error, "Bridge request failed");
        (status, Json(ErrorResponse { error, code })).into_response()
    }
}
