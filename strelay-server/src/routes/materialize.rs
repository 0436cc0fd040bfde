//! Episode materialization: runs the whole download pipeline and streams the
//! assembled file back as an attachment.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use relay_engine::{MaterializeOptions, MaterializedFile, ProgressSnapshot, Quality};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_fallback() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeQuery {
    server_type: Option<String>,
    #[serde(default)]
    server_index: usize,
    quality: Option<String>,
    #[serde(default = "default_fallback")]
    fallback: bool,
}

impl MaterializeQuery {
    fn into_options(self) -> MaterializeOptions {
        MaterializeOptions {
            server_type: self.server_type,
            server_index: self.server_index,
            quality: self
                .quality
                .as_deref()
                .map(Quality::parse)
                .unwrap_or_default(),
            fallback: self.fallback,
        }
    }
}

/// Streams the assembled file's bytes while keeping the job's temporary
/// directory alive. Dropping this stream (including on client disconnect)
/// drops the [`MaterializedFile`] and releases the staged data.
struct MaterializedStream {
    inner: ReaderStream<tokio::fs::File>,
    _materialized: MaterializedFile,
}

impl Stream for MaterializedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub async fn materialize(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Query(query): Query<MaterializeQuery>,
) -> ApiResult<Response> {
    let options = query.into_options();
    let materialized = state.orchestrator.materialize(&episode_id, options).await?;

    let file = tokio::fs::File::open(materialized.path())
        .await
        .map_err(|e| ApiError::internal(format!("assembled file unreadable: {e}")))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("assembled file unreadable: {e}")))?
        .len();

    info!(
        episode = %episode_id,
        file = %materialized.file_name,
        bytes = length,
        "materialized episode ready"
    );

    let content_type = materialized.assembled.container.content_type();
    let disposition = format!("attachment; filename=\"{}\"", materialized.file_name);
    let stream = MaterializedStream {
        inner: ReaderStream::new(file),
        _materialized: materialized,
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

pub async fn status(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
) -> Json<ProgressSnapshot> {
    Json(state.orchestrator.progress(&episode_id))
}
