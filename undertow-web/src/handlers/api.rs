//! JSON handlers for session status, adding content and shutdown

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use undertow_core::{AttachRequest, MagnetLink, SessionStatus};

use crate::error::ApiError;
use crate::server::AppState;

/// Query parameters identifying content for `/add` and `/video`.
#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    #[serde(alias = "magnet_link")]
    pub link: Option<String>,
    pub download_dir: Option<PathBuf>,
    /// Base64 JSON object merged into telemetry properties
    #[serde(alias = "mixpanel_data")]
    pub telemetry_data: Option<String>,
}

impl ContentQuery {
    /// Validates the link and builds a registry request.
    ///
    /// # Errors
    /// - `ApiError::MissingLink` - No `link` parameter
    /// - `ApiError::InvalidLink` - Link is not a usable magnet link
    pub fn attach_request(&self) -> Result<AttachRequest, ApiError> {
        let link = self.link.as_deref().ok_or(ApiError::MissingLink)?;
        let link = MagnetLink::parse(link)?;

        Ok(AttachRequest {
            link,
            download_dir: self.download_dir.clone(),
            telemetry_context: self.telemetry_data.clone(),
        })
    }
}

/// JSON response rendered with two-space indentation.
pub struct PrettyJson<T>(pub T);

impl<T: Serialize> IntoResponse for PrettyJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec_pretty(&self.0) {
            Ok(body) => (
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Failed to serialize response: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// `GET /` - status of every session.
pub async fn status_all(
    State(state): State<AppState>,
) -> Result<PrettyJson<Vec<SessionStatus>>, ApiError> {
    Ok(PrettyJson(state.registry.statuses().await?))
}

/// `GET /add` - resolves or creates a session and reports its status.
///
/// The request holds a connection only while it is answered, so a session
/// that nobody streams from still follows the pause and remove timers.
pub async fn add_content(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> Result<PrettyJson<SessionStatus>, ApiError> {
    let request = query.attach_request()?;
    let attachment = state.registry.attach(request).await?;
    Ok(PrettyJson(attachment.status))
}

/// `GET /shutdown` - destroys every session, then stops the server.
pub async fn shutdown_server(State(state): State<AppState>) -> Response {
    tracing::info!("Shutdown requested over HTTP");

    if let Err(e) = state.registry.shutdown().await {
        tracing::debug!("Registry already stopped: {e}");
    }
    state.shutdown.trigger();

    PrettyJson(json!({ "status": "shutting down" })).into_response()
}
