//! HTTP token endpoint
//!
//! `POST /api/auth/token` with `{ "username": "..." }`:
//! - `200` with a `Credential` bound to the trimmed username
//! - `400 { "error": "Username required" }` when it is missing or blank
//! - `500 { "error": ... }` when signing fails
//!
//! `GET /` answers a plain liveness string. Cross-origin callers are limited
//! to the configured allow-list.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::auth::client::{ErrorBody, TOKEN_PATH, TokenRequest};
use crate::auth::token::TokenIssuer;
use crate::config::{ListenMode, Settings};
use crate::utils::error::TokenError;

#[derive(Clone)]
struct AuthState {
    issuer: Arc<TokenIssuer>,
}

pub fn router(issuer: TokenIssuer, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("ignoring invalid CORS origin '{origin}': {e}");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route(TOKEN_PATH, post(issue_token))
        .layer(cors)
        .with_state(AuthState {
            issuer: Arc::new(issuer),
        })
}

async fn root() -> &'static str {
    "Server is running."
}

async fn issue_token(State(state): State<AuthState>, Json(body): Json<TokenRequest>) -> Response {
    let username = body.username.unwrap_or_default();

    match state.issuer.issue(&username) {
        Ok(credential) => {
            info!(client = %credential.client_id, "issued credential");
            (StatusCode::OK, Json(credential)).into_response()
        }
        Err(TokenError::EmptyUsername) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Username required".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("credential issuance failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Serve the token endpoint according to `settings.server.mode`.
///
/// In `fronted` mode nothing is bound: an outer process is expected to mount
/// [`router`] itself.
pub async fn serve(settings: &Settings) -> std::io::Result<()> {
    if settings.server.mode == ListenMode::Fronted {
        info!("listen mode is 'fronted'; not binding a listener");
        return Ok(());
    }

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("token endpoint listening on http://{addr}");

    let app = router(
        TokenIssuer::from_settings(&settings.auth),
        &settings.auth.allowed_origins,
    );
    axum::serve(listener, app).await
}
