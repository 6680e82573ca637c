// crates/callosum-server/src/routes.rs
// ============================================================================
// Module: Server Routes
// Description: HTTP handlers for the status/journal/intercept/complete/
// lock/unlock RPC surface.
// Purpose: Translate JSON requests into gate and store calls and back.
// Dependencies: axum, callosum-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every handler returns `200 OK` with a JSON body on success; a store or
//! gate failure maps to `503 Service Unavailable`, since the underlying
//! cause is almost always a persistence problem rather than a malformed
//! request. A malformed request body maps to `400 Bad Request` via axum's
//! built-in `Json` extractor rejection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use callosum_core::core::ContextKey;
use callosum_core::core::InstanceId;
use callosum_core::core::JournalEntry;
use callosum_core::core::Lock;
use callosum_core::core::Tier;
use callosum_core::gate::GateError;
use callosum_core::store::Conflict;
use callosum_core::store::StoreError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

/// Default number of journal entries returned when `limit` is omitted.
const DEFAULT_JOURNAL_LIMIT: usize = 50;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the gate's HTTP router over `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", post(status))
        .route("/journal", post(journal))
        .route("/intercept", post(intercept))
        .route("/complete", post(complete))
        .route("/lock", post(lock))
        .route("/unlock", post(unlock))
        .with_state(state)
}

// ============================================================================
// SECTION: Status
// ============================================================================

/// Query parameters accepted by `/status`.
#[derive(Debug, Deserialize)]
struct StatusQuery {
    /// Optional context-key filter.
    #[serde(rename = "contextKey", default)]
    context_key: Option<String>,
}

/// Response body for `/status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    /// Active (non-expired) locks, filtered to `contextKey` when given.
    locks: Vec<Lock>,
    /// Recent context records on `contextKey`, when given. Empty without a
    /// filter: the store interface exposes per-key lookups, not a bulk scan
    /// across every key, so an unfiltered status call reports locks only.
    #[serde(rename = "recentContexts")]
    recent_contexts: Vec<callosum_core::core::ContextRecord>,
}

/// Handles `POST /status`.
async fn status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Result<Response, ApiError> {
    let now = state.clock.now_millis();
    let locks = state.store.active_locks(now)?;
    let (locks, recent_contexts) = match query.context_key {
        Some(raw) => {
            let key = ContextKey::new(raw).map_err(|error| ApiError::BadRequest(error.to_string()))?;
            let filtered = locks.into_iter().filter(|lock| lock.context_key == key).collect();
            let recent = state
                .store
                .recent_context(&key, now, i64::MAX)?
                .into_iter()
                .collect();
            (filtered, recent)
        }
        None => (locks, Vec::new()),
    };
    Ok(Json(StatusResponse { locks, recent_contexts }).into_response())
}

// ============================================================================
// SECTION: Journal
// ============================================================================

/// Request body for `/journal`.
#[derive(Debug, Deserialize)]
struct JournalRequest {
    /// Maximum number of entries to return, newest last.
    #[serde(default)]
    limit: Option<usize>,
}

/// Response body for `/journal`.
#[derive(Debug, Serialize)]
struct JournalResponse {
    /// Matching journal entries, newest last.
    entries: Vec<JournalEntry>,
}

/// Handles `POST /journal`.
async fn journal(State(state): State<AppState>, Json(request): Json<JournalRequest>) -> Result<Response, ApiError> {
    let limit = request.limit.unwrap_or(DEFAULT_JOURNAL_LIMIT);
    let entries = state.store.recent_journal(limit)?;
    Ok(Json(JournalResponse { entries }).into_response())
}

// ============================================================================
// SECTION: Intercept
// ============================================================================

/// Request body for `/intercept`.
#[derive(Debug, Deserialize)]
struct InterceptRequest {
    /// Calling instance.
    instance: String,
    /// Tool name being intercepted.
    tool: String,
    /// Caller-supplied action label, carried through to the response `id`
    /// for correlation but not otherwise interpreted — classification
    /// depends only on `tool` and `params`.
    #[serde(default)]
    action: Option<String>,
    /// Tool call parameters.
    #[serde(default)]
    params: Value,
}

/// Response body for `/intercept`.
#[derive(Debug, Serialize)]
struct InterceptResponse {
    /// Whether the caller should proceed with the underlying tool call.
    proceed: bool,
    /// Tier assigned by the classifier.
    tier: u8,
    /// Context key, if the matching rule produced one.
    #[serde(rename = "contextKey")]
    context_key: Option<String>,
    /// Human-readable conflict description, present on pause or block.
    conflicts: Option<String>,
    /// Non-blocking warning, present when a tier-3 conflict was observed.
    warning: Option<String>,
    /// Correlation id for a subsequent `/complete` call.
    id: String,
}

/// Handles `POST /intercept`: runs the pre-call half of the decision
/// procedure and tracks the resulting decision for a later `/complete`.
async fn intercept(
    State(state): State<AppState>,
    Json(request): Json<InterceptRequest>,
) -> Result<Response, ApiError> {
    let instance = InstanceId::new(request.instance).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let gate = state.gate_for(&instance);
    let decision = gate.before_tool_call(&request.tool, &request.params)?;

    let id = format!(
        "{}:{}:{}",
        instance,
        request.tool,
        request.action.as_deref().unwrap_or("intercept")
    );
    let context_key = decision.classification.context_key.as_ref().map(ToString::to_string);

    let (proceed, conflicts, warning) = match &decision.verdict {
        callosum_core::gate::Verdict::Allow { warning } => (true, None, warning.clone()),
        callosum_core::gate::Verdict::Pause { reason } | callosum_core::gate::Verdict::Block { reason } => {
            (false, Some(reason.clone()), None)
        }
    };
    let tier = decision.classification.tier.as_u8();

    state.track_pending(instance, decision);

    Ok(Json(InterceptResponse { proceed, tier, context_key, conflicts, warning, id }).into_response())
}

// ============================================================================
// SECTION: Complete
// ============================================================================

/// Request body for `/complete`.
#[derive(Debug, Deserialize)]
struct CompleteRequest {
    /// Calling instance.
    instance: String,
    /// Context key from the matching `/intercept` call.
    #[serde(rename = "contextKey", default)]
    context_key: Option<String>,
    /// Whether the underlying tool call succeeded.
    result: bool,
}

/// Response body for `/complete`.
#[derive(Debug, Serialize)]
struct CompleteResponse {
    /// Whether a matching pending decision was found and completed.
    ok: bool,
}

/// Handles `POST /complete`: looks up the pending decision from `/intercept`
/// and runs the post-call half of the decision procedure against it.
async fn complete(State(state): State<AppState>, Json(request): Json<CompleteRequest>) -> Result<Response, ApiError> {
    let instance = InstanceId::new(request.instance).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let Some(raw_key) = request.context_key else {
        return Ok(Json(CompleteResponse { ok: false }).into_response());
    };
    let context_key = ContextKey::new(raw_key).map_err(|error| ApiError::BadRequest(error.to_string()))?;

    let Some(decision) = state.take_pending(&instance, &context_key) else {
        return Ok(Json(CompleteResponse { ok: false }).into_response());
    };
    let gate = state.gate_for(&instance);
    gate.after_tool_call(&decision, &Value::Null, request.result)?;
    Ok(Json(CompleteResponse { ok: true }).into_response())
}

// ============================================================================
// SECTION: Lock / Unlock
// ============================================================================

/// Request body shared by `/lock` and `/unlock`.
#[derive(Debug, Deserialize)]
struct LockRequest {
    /// Calling instance.
    instance: String,
    /// Context key to lock or unlock.
    #[serde(rename = "contextKey")]
    context_key: String,
    /// Tier of the call holding the lock. Ignored by `/unlock`.
    #[serde(default)]
    tier: u8,
}

/// Response body shared by `/lock` and `/unlock`.
#[derive(Debug, Serialize)]
struct LockResponse {
    /// Whether the lock is held by the calling instance after this call.
    acquired: bool,
    /// Present when `/lock` failed because another instance holds the
    /// context key.
    conflict: Option<String>,
}

/// Handles `POST /lock`: an explicit advisory-lock acquisition outside the
/// classify-then-decide path, for a caller that already knows its tier.
async fn lock(State(state): State<AppState>, Json(request): Json<LockRequest>) -> Result<Response, ApiError> {
    let instance = InstanceId::new(request.instance).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let context_key =
        ContextKey::new(request.context_key).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let tier = Tier::try_from(request.tier).map_err(|error| ApiError::BadRequest(error.to_string()))?;

    let now = state.clock.now_millis();
    let conflict_before = state.store.check_conflict(&context_key, &instance, tier, now, state.lock_expiry_millis)?;
    let acquired = state.store.acquire_lock(&context_key, &instance, tier, now, now + state.lock_expiry_millis)?;
    let conflict = (!acquired).then(|| describe_conflict(&conflict_before));

    Ok(Json(LockResponse { acquired, conflict }).into_response())
}

/// Handles `POST /unlock`: releases an explicitly acquired lock early.
async fn unlock(State(state): State<AppState>, Json(request): Json<LockRequest>) -> Result<Response, ApiError> {
    let instance = InstanceId::new(request.instance).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    let context_key =
        ContextKey::new(request.context_key).map_err(|error| ApiError::BadRequest(error.to_string()))?;
    state.store.release_lock(&context_key, &instance)?;
    Ok(Json(LockResponse { acquired: false, conflict: None }).into_response())
}

/// Renders a conflict for the `/lock` response, when one applies.
fn describe_conflict(conflict: &Conflict) -> String {
    match conflict {
        Conflict::None => "lock was claimed by another instance between check and acquire".to_string(),
        Conflict::LockedByOther { holder } => format!("held by instance {holder}"),
        Conflict::RecentOther { instance, timestamp } => {
            format!("recent conflicting activity by instance {instance} at {timestamp}")
        }
    }
}

// ============================================================================
// SECTION: API Error
// ============================================================================

/// Error response shape shared by every handler.
enum ApiError {
    /// The request body failed validation before reaching the store.
    BadRequest(String),
    /// The coordination store or gate failed.
    Unavailable(String),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
