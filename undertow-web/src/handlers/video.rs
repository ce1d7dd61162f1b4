//! Range-aware streaming of a session's main file

use axum::body::Body;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use undertow_core::{Attachment, ConnectionGuard, SessionState, StreamSource};

use super::api::ContentQuery;
use super::range::{ByteRange, extract_range_header, parse_range};
use crate::error::ApiError;
use crate::server::AppState;
use crate::streaming::CountingStream;

const DLNA_TRANSFER_MODE: HeaderName = HeaderName::from_static("transfermode.dlna.org");
const DLNA_CONTENT_FEATURES: HeaderName = HeaderName::from_static("contentfeatures.dlna.org");
const DLNA_FEATURES: &str = "DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000";

/// `GET /video` - streams the main file of the content.
///
/// While metadata is still arriving the client is parked for the retry delay
/// and redirected to the same URL, so players poll without custom logic.
///
/// # Errors
/// - `ApiError::MissingLink` / `ApiError::InvalidLink` - Bad query (400)
/// - `ApiError::Unavailable` - Session failed to fetch metadata (404)
/// - `ApiError::Range` - Range header cannot be served (416)
pub async fn stream_video(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = query.attach_request()?;
    let info_hash = request.link.info_hash;
    let Attachment {
        guard,
        status,
        stream,
    } = state.registry.attach(request).await?;

    match (status.state, stream) {
        (session_state, Some(source)) if session_state.is_streamable() => {
            respond_with_range(source, guard, &headers)
        }
        (SessionState::AcquiringMetadata, _) => {
            tokio::time::sleep(state.config.lifecycle.retry_delay).await;
            drop(guard);
            Ok(Redirect::temporary(&uri.to_string()).into_response())
        }
        _ => Err(ApiError::Unavailable { info_hash }),
    }
}

fn respond_with_range(
    source: StreamSource,
    guard: ConnectionGuard,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let total = source.length();
    let range = extract_range_header(headers)
        .map(|value| parse_range(value, total))
        .transpose()?;
    let read_range = range
        .or_else(|| ByteRange::full(total))
        .map_or(0..0, |range| range.as_read_range());

    let body = CountingStream::new(source.open(read_range)?, source.meter().clone(), guard);
    let content_type = mime_guess::from_path(source.path()).first_or_octet_stream();

    let builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(DLNA_TRANSFER_MODE, "Streaming")
        .header(DLNA_CONTENT_FEATURES, DLNA_FEATURES);

    let builder = match range {
        Some(range) => partial_content(builder, range, total),
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total),
    };

    Ok(builder.body(Body::from_stream(body))?)
}

fn partial_content(
    builder: axum::http::response::Builder,
    range: ByteRange,
    total: u64,
) -> axum::http::response::Builder {
    builder
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_LENGTH, range.content_length())
        .header(header::CONTENT_RANGE, range.content_range(total))
}
