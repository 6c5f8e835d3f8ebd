use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use taxreg_contracts::{Customer, CustomerDraft};
use taxreg_store::StoreError;
use tracing::Instrument;

use super::{
    ApiError, AppState, ERR_VALIDATION, extract_request_id, json_error, store_error_response,
    validation_error,
};

#[derive(Debug, Serialize)]
pub(super) struct SaveResponse {
    pub(super) success: bool,
    pub(super) message: &'static str,
    pub(super) data: Customer,
}

/// Create-or-update entry point. A positive submission id means update; zero
/// or absent means create, even if the same customer was submitted before —
/// only the tax-id uniqueness constraint guards against a second row.
pub(super) async fn save_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<CustomerDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<SaveResponse>), ApiError> {
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "customer.save",
        request_id = %request_id,
        mode = tracing::field::Empty,
        customer_id = tracing::field::Empty,
        outcome = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let result = async move {
        // A body that does not bind to the draft shape is one generic
        // validation failure; field-keyed reporting comes only from the
        // validator, never from parser error text.
        let Json(draft) = req.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                ERR_VALIDATION,
                "invalid JSON body",
                false,
            )
        })?;

        let draft = draft
            .validate()
            .map_err(|errors| validation_error("submitted customer data is invalid", errors))?;

        let mode = if draft.is_update() { "update" } else { "create" };
        tracing::Span::current().record("mode", mode);

        let saved = if draft.is_update() {
            state
                .store
                .update(&draft)
                .await
                .map(|customer| (StatusCode::OK, "customer updated", customer))
        } else {
            state
                .store
                .create(&draft)
                .await
                .map(|customer| (StatusCode::CREATED, "customer created", customer))
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency_ms);

        match saved {
            Ok((status, message, customer)) => {
                crate::metrics::inc_customer_save(mode, "ok");
                tracing::Span::current().record("customer_id", customer.id);
                tracing::Span::current().record("outcome", "ok");
                Ok((
                    status,
                    Json(SaveResponse {
                        success: true,
                        message,
                        data: customer,
                    }),
                ))
            }
            Err(err) => {
                let outcome = save_failure_outcome(&err);
                crate::metrics::inc_customer_save(mode, outcome);
                tracing::Span::current().record("outcome", outcome);
                tracing::warn!(request_id = %request_id, error = %err, "customer save failed");
                Err(store_error_response(&err))
            }
        }
    }
    .instrument(span)
    .await;

    let status = match &result {
        Ok((status, _)) => *status,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(
        "/api/customer",
        "POST",
        status.as_u16(),
        started.elapsed(),
    );

    result
}

fn save_failure_outcome(err: &StoreError) -> &'static str {
    match err {
        StoreError::DuplicateTaxId => "duplicate_tax_id",
        StoreError::NotFound => "not_found",
        StoreError::Timeout | StoreError::Sqlx(_) => "store_unavailable",
    }
}
