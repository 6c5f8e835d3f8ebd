use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use taxreg_contracts::{Customer, FieldErrors};
use taxreg_store::{CustomerStore, StoreError};
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{ServerConfig, StartupError};

mod save;

use self::save::save_customer;

const ERR_VALIDATION: &str = "ERR_VALIDATION";
const ERR_DUPLICATE_TAX_ID: &str = "ERR_DUPLICATE_TAX_ID";
const ERR_NOT_FOUND: &str = "ERR_NOT_FOUND";
const ERR_STORE_UNAVAILABLE: &str = "ERR_STORE_UNAVAILABLE";

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    store: CustomerStore,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let store = CustomerStore::connect_and_migrate(
        &config.db_url,
        config.db_max_connections,
        Duration::from_millis(config.store_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize customer store: {}", err),
    })?;

    let state = AppState { config, store };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/customer/search", get(search_customer))
        .route("/api/customer", post(save_customer))
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("store", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<Customer>,
}

async fn search_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "customer.search",
        request_id = %request_id,
        outcome = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let result = async move {
        let term = params.q.trim();
        if term.is_empty() {
            tracing::Span::current().record("outcome", "invalid");
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                ERR_VALIDATION,
                "provide a tax id or phone number to search",
                false,
            ));
        }

        let searched = state.store.search(term).await;

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);

        match searched {
            Ok(customer) => {
                let outcome = if customer.is_some() { "found" } else { "miss" };
                crate::metrics::inc_customer_search(outcome);
                tracing::Span::current().record("outcome", outcome);
                Ok(Json(SearchResponse {
                    found: customer.is_some(),
                    customer,
                }))
            }
            Err(err) => {
                crate::metrics::inc_customer_search("error");
                tracing::Span::current().record("outcome", "error");
                tracing::error!(request_id = %request_id, error = %err, "customer search failed");
                Err(store_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(
        "/api/customer/search",
        "GET",
        status.as_u16(),
        started.elapsed(),
    );

    result
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    code: &'static str,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            code,
            message: message.into(),
            retryable,
            errors: None,
        }),
    )
}

fn validation_error(message: impl Into<String>, errors: FieldErrors) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            code: ERR_VALIDATION,
            message: message.into(),
            retryable: false,
            errors: Some(errors),
        }),
    )
}

/// Map the store's typed outcome onto the HTTP contract: conflict 409,
/// missing update target 404, anything infrastructural 500 (retryable).
fn store_error_response(err: &StoreError) -> ApiError {
    match err {
        StoreError::DuplicateTaxId => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                success: false,
                code: ERR_DUPLICATE_TAX_ID,
                message: "this tax id is already registered".to_string(),
                retryable: false,
                errors: Some(FieldErrors::from([(
                    "tax_id",
                    "this tax id is already in use by another customer".to_string(),
                )])),
            }),
        ),
        StoreError::NotFound => json_error(
            StatusCode::NOT_FOUND,
            ERR_NOT_FOUND,
            "customer to update was not found",
            false,
        ),
        StoreError::Timeout | StoreError::Sqlx(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERR_STORE_UNAVAILABLE,
            "customer store unavailable",
            true,
        ),
    }
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-taxreg-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let out = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(MAX_LEN)
        .collect::<String>();

    if out.is_empty() { None } else { Some(out) }
}
