use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use starchart_service::metric;
use starchart_service::upstream::USER_AGENT;

use crate::service::RequestService;

/// The soft-failure envelope browser callers receive instead of a hard
/// error.
#[derive(Debug, Serialize)]
struct RelayFailure {
    success: bool,
    message: String,
    fallback: bool,
}

/// Relays a listing request to the upstream API.
///
/// The gallery page cannot POST to the upstream host directly, so this
/// endpoint forwards the JSON body verbatim. Upstream trouble comes back
/// as a `200` soft-failure envelope; passing the real status through
/// would force every browser caller to special-case it.
pub async fn relay_gallery_request(
    State(service): State<RequestService>,
    body: Bytes,
) -> Response {
    let upstream = service.config().upstream.listing_url.clone();

    let result = service
        .proxy_client()
        .post(upstream)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, USER_AGENT)
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => match response.bytes().await {
            Ok(payload) => {
                metric!(counter("gallery.relay") += 1, "status" => "ok");
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    payload,
                )
                    .into_response()
            }
            Err(error) => {
                tracing::warn!(error = %error, "reading relayed listing body failed");
                soft_failure(format!("listing call failed: {error}"))
            }
        },
        Ok(response) => {
            tracing::warn!("listing relay got upstream status {}", response.status());
            soft_failure(format!("listing call failed: {}", response.status()))
        }
        Err(error) => {
            tracing::warn!(error = %error, "listing relay failed");
            soft_failure(format!("listing call failed: {error}"))
        }
    }
}

fn soft_failure(message: String) -> Response {
    metric!(counter("gallery.relay") += 1, "status" => "fallback");
    // deliberately a 200, see the handler docs
    Json(RelayFailure {
        success: false,
        message,
        fallback: true,
    })
    .into_response()
}
