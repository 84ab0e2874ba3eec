//! JSON-over-HTTP surface for the portal and the SMS relay function.

use crate::errors::{AppError, AppResult};
use crate::lifecycle::ComplaintService;
use crate::models::{
    ComplaintFilter, ComplaintStatus, District, Principal, ServiceCategory, SignUpPayload, SmsRequest,
    SmsResponse, SubmitComplaintPayload, UpdateStatusPayload,
};
use crate::relay::{NotificationRelay, MISSING_CREDENTIALS};
use crate::session::{require_admin, AuthState, Gate, Route, SessionManager};
use crate::subscription::Subscription;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ComplaintService>,
    pub sessions: Arc<SessionManager>,
    pub relay: Arc<NotificationRelay>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    let functions = Router::new()
        .route("/functions/v1/send-sms", post(send_sms).options(preflight))
        .layer(cors);

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/login", post(sign_in))
        .route("/api/auth/logout", post(sign_out))
        .route("/api/auth/session", get(current_session))
        .route("/api/complaints", post(submit_complaint))
        .route("/api/complaints/mine", get(list_own_complaints))
        .route("/api/complaints/mine/events", get(own_complaint_events))
        .route("/api/complaints/:id", get(get_complaint))
        .route("/api/admin/complaints", get(list_all_complaints))
        .route("/api/admin/complaints/events", get(all_complaint_events))
        .route("/api/admin/complaints/:id", patch(update_complaint_status))
        .merge(functions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    Gate(Gate),
}

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self::App(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::App(error) => {
                let status = match &error {
                    AppError::Validation(_) => StatusCode::BAD_REQUEST,
                    AppError::Auth(_) => StatusCode::UNAUTHORIZED,
                    AppError::Policy(_) => StatusCode::FORBIDDEN,
                    AppError::NotFound(_) => StatusCode::NOT_FOUND,
                    AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
                    AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %error, "request failed");
                }
                (status, Json(json!({ "error": error.detail(), "code": error.code() }))).into_response()
            }
            Self::Gate(Gate::Redirect(route)) => {
                let (status, message) = match route {
                    Route::AdminLogin => (StatusCode::UNAUTHORIZED, "Sign in as an administrator"),
                    Route::PublicForm => (StatusCode::FORBIDDEN, "Administrator access is required"),
                };
                (status, Json(json!({ "error": message, "redirect": route.path() }))).into_response()
            }
            Self::Gate(Gate::Loading) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Session is still being resolved" })),
            )
                .into_response(),
            Self::Gate(Gate::Render) => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

const EVENT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// SQLite calls hold a connection lock and may wait out the busy timeout, so
/// they run on the blocking pool rather than a runtime worker.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| AppError::Internal(format!("blocking task failed: {}", error)))?
        .map_err(ApiError::from)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

async fn session_state(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthState> {
    let sessions = Arc::clone(&state.sessions);
    let token = bearer_token(headers);
    blocking(move || Ok(sessions.resolve(token.as_deref()))).await
}

async fn resolve_principal(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    Ok(session_state(state, headers).await?.principal())
}

async fn admin_principal(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let session = session_state(state, headers).await?;
    match require_admin(&session) {
        Gate::Render => Ok(session.principal()),
        gate => Err(ApiError::Gate(gate)),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn sign_up(State(state): State<AppState>, Json(payload): Json<SignUpPayload>) -> ApiResult<impl IntoResponse> {
    let sessions = Arc::clone(&state.sessions);
    let identity = blocking(move || sessions.sign_up(payload)).await?;
    Ok((StatusCode::CREATED, Json(identity)))
}

async fn sign_in(State(state): State<AppState>, Json(payload): Json<SignUpPayload>) -> ApiResult<impl IntoResponse> {
    let sessions = Arc::clone(&state.sessions);
    Ok(Json(blocking(move || sessions.sign_in(payload)).await?))
}

async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let token = bearer_token(&headers).ok_or_else(|| AppError::Auth("No session to sign out of".to_string()))?;
    let sessions = Arc::clone(&state.sessions);
    let signed_out = blocking(move || sessions.sign_out(&token)).await?;
    Ok(Json(json!({ "signedOut": signed_out })))
}

async fn current_session(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Principal>> {
    Ok(Json(resolve_principal(&state, &headers).await?))
}

async fn submit_complaint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubmitComplaintPayload>,
) -> ApiResult<impl IntoResponse> {
    let principal = resolve_principal(&state, &headers).await?;
    let service = Arc::clone(&state.service);
    let complaint = blocking(move || service.submit(&principal, payload)).await?;
    Ok((StatusCode::CREATED, Json(complaint)))
}

async fn list_own_complaints(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let principal = resolve_principal(&state, &headers).await?;
    let service = Arc::clone(&state.service);
    Ok(Json(blocking(move || service.list_own(&principal)).await?))
}

async fn get_complaint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(complaint_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let principal = resolve_principal(&state, &headers).await?;
    let service = Arc::clone(&state.service);
    Ok(Json(blocking(move || service.get(&principal, complaint_id)).await?))
}

/// Server-sent `invalidate` events; clients refetch their list on each one.
fn invalidation_events(subscription: Subscription) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(scope = ?subscription.scope(), "change stream opened");
    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let invalidation = subscription.next_invalidation().await?;
        let event = Event::default()
            .event("invalidate")
            .data(serde_json::to_string(&invalidation).unwrap_or_default());
        Some((Ok::<_, Infallible>(event), subscription))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(EVENT_KEEP_ALIVE).text("ping"))
}

async fn own_complaint_events(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let principal = resolve_principal(&state, &headers).await?;
    let subscription = state.service.subscribe_own(&principal)?;
    Ok(invalidation_events(subscription).into_response())
}

async fn all_complaint_events(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    let principal = admin_principal(&state, &headers).await?;
    let subscription = state.service.subscribe(&principal)?;
    Ok(invalidation_events(subscription).into_response())
}

/// Query string filter. Empty values mean "not filtered".
#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub district: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
}

impl TryFrom<FilterQuery> for ComplaintFilter {
    type Error = AppError;

    fn try_from(query: FilterQuery) -> Result<Self, Self::Error> {
        Ok(Self {
            district: parse_optional::<District>(query.district)?,
            status: parse_optional::<ComplaintStatus>(query.status)?,
            category: parse_optional::<ServiceCategory>(query.category)?,
        })
    }
}

fn parse_optional<T>(raw: Option<String>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = AppError>,
{
    raw.filter(|value| !value.trim().is_empty())
        .map(|value| T::from_str(value.trim()))
        .transpose()
}

async fn list_all_complaints(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> ApiResult<impl IntoResponse> {
    let principal = admin_principal(&state, &headers).await?;
    let filter = ComplaintFilter::try_from(query)?;
    let service = Arc::clone(&state.service);
    Ok(Json(blocking(move || service.list_all(&principal, &filter)).await?))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBody {
    pub status: String,
    #[serde(default)]
    pub admin_response: Option<String>,
}

async fn update_complaint_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(complaint_id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> ApiResult<impl IntoResponse> {
    let principal = admin_principal(&state, &headers).await?;
    let payload = UpdateStatusPayload {
        complaint_id,
        status: ComplaintStatus::from_str(&body.status)?,
        admin_response: body.admin_response,
    };
    Ok(Json(state.service.update_status(&principal, payload).await?))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn send_sms(State(state): State<AppState>, body: Bytes) -> Response {
    if !state.relay.has_credentials() {
        tracing::error!("sms gateway credentials are not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SmsResponse::failed(MISSING_CREDENTIALS)),
        )
            .into_response();
    }

    let request: SmsRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(error = %error, "sms request body rejected");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SmsResponse::failed(format!("Invalid request body: {}", error))),
            )
                .into_response();
        }
    };

    match state.relay.send(&request).await {
        Ok(receipt) => (StatusCode::OK, Json(SmsResponse::sent(receipt))).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(SmsResponse::failed(error.detail())),
        )
            .into_response(),
    }
}
