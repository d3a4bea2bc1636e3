//! Axum router and all HTTP handlers for mart-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.
//!
//! Authentication is owned by an upstream gateway: handlers trust the
//! `Login` header for the caller identity and answer 401 when it is absent.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info};

use crate::{
    api_types::{ErrorResponse, HealthResponse, OrderView, WithdrawRequest, WithdrawalView},
    state::AppState,
};
use mart_engine::{EngineError, Submission};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing) are **not** applied here; `main.rs` attaches
/// them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/api/user/orders", post(submit_order).get(list_orders))
        .route("/api/user/balance", get(balance))
        .route("/api/user/balance/withdraw", post(withdraw))
        .route("/api/user/withdrawals", get(list_withdrawals))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Caller identity from the `Login` header.
fn identity(headers: &HeaderMap) -> Result<&str, Response> {
    match headers.get("Login").and_then(|value| value.to_str().ok()) {
        Some(login) if !login.is_empty() => Ok(login),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing Login header".to_string(),
            }),
        )
            .into_response()),
    }
}

/// Map an engine refusal onto the API's status codes.
fn refusal(err: EngineError) -> Response {
    let status = match &err {
        EngineError::InvalidNumber | EngineError::InvalidAmount | EngineError::NotFound => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Conflict => StatusCode::CONFLICT,
        EngineError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        EngineError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Storage(cause) => {
            error!(error = ?cause, "storage failure");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal error".to_string(),
                }),
            )
                .into_response();
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/user/orders
// ---------------------------------------------------------------------------

/// Submit an order number (bare text body).
///
/// 202 new submission; 200 the same owner already submitted it; 409 owned
/// by someone else; 422 bad checksum or unknown to the authority; 503 the
/// authority is unreachable.
pub(crate) async fn submit_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let login = match identity(&headers) {
        Ok(login) => login,
        Err(resp) => return resp,
    };
    let number = body.trim();

    match st.service.submit_order(login, number).await {
        Ok(Submission::Accepted) => {
            info!(owner = login, number, "user/orders accepted");
            StatusCode::ACCEPTED.into_response()
        }
        Ok(Submission::AlreadySubmitted) => StatusCode::OK.into_response(),
        Err(err) => refusal(err),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/orders
// ---------------------------------------------------------------------------

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let login = match identity(&headers) {
        Ok(login) => login,
        Err(resp) => return resp,
    };

    match st.service.orders(login).await {
        Ok(orders) if orders.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(orders) => {
            let views: Vec<OrderView> = orders.into_iter().map(OrderView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => refusal(err),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/balance
// ---------------------------------------------------------------------------

pub(crate) async fn balance(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let login = match identity(&headers) {
        Ok(login) => login,
        Err(resp) => return resp,
    };

    match st.service.balance(login).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => refusal(err),
    }
}

// ---------------------------------------------------------------------------
// POST /api/user/balance/withdraw
// ---------------------------------------------------------------------------

/// Spend points against an order number.
///
/// 200 accepted; 402 the balance does not cover the sum; 422 bad checksum
/// or non-positive sum.
pub(crate) async fn withdraw(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WithdrawRequest>,
) -> Response {
    let login = match identity(&headers) {
        Ok(login) => login,
        Err(resp) => return resp,
    };

    match st.service.withdraw(login, &req.order, req.sum).await {
        Ok(()) => {
            info!(owner = login, order = %req.order, sum = %req.sum, "user/withdraw accepted");
            StatusCode::OK.into_response()
        }
        Err(err) => refusal(err),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/withdrawals
// ---------------------------------------------------------------------------

pub(crate) async fn list_withdrawals(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let login = match identity(&headers) {
        Ok(login) => login,
        Err(resp) => return resp,
    };

    match st.service.withdrawals(login).await {
        Ok(withdrawals) if withdrawals.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(withdrawals) => {
            let views: Vec<WithdrawalView> =
                withdrawals.into_iter().map(WithdrawalView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => refusal(err),
    }
}
