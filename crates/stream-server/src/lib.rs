use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::Response,
    routing::get,
};
use serde::Deserialize;

pub mod cleanup;
pub mod poller;
pub mod profile;
pub mod relay;
pub mod session;
pub mod supervisor;

pub use profile::Profile;
pub use session::StreamConfig;
pub use supervisor::RestartPolicy;

/// Resolves a channel identifier to the upstream source the transcoder pulls
/// from. The relay depends on this one capability, not on the library's
/// storage shape.
pub trait ChannelSource: Send + Sync + 'static {
    fn stream_url(&self, channel_id: i64) -> anyhow::Result<Option<String>>;
}

#[derive(Clone)]
pub struct StreamServerState {
    pub config: Arc<StreamConfig>,
    pub channels: Arc<dyn ChannelSource>,
}

pub fn create_router(config: StreamConfig, channels: Arc<dyn ChannelSource>) -> Router {
    let state = StreamServerState {
        config: Arc::new(config),
        channels,
    };

    Router::new()
        .route("/stream/{channel_id}", get(stream_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub profile: Profile,
}

/// Relays one live channel as a continuous MPEG-TS body. The response never
/// terminates on its own; client disconnect is the normal completion, and
/// mid-stream faults surface as a stalled or ended stream, never as an HTTP
/// error (headers are long gone by then).
async fn stream_handler(
    State(state): State<StreamServerState>,
    Path(channel_id): Path<i64>,
    Query(params): Query<StreamParams>,
) -> Result<Response, StatusCode> {
    let input_url = state
        .channels
        .stream_url(channel_id)
        .map_err(|err| {
            tracing::error!("channel lookup failed: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let id = channel_id.to_string();
    tracing::info!("[{id}] starting {:?} relay of {input_url}", params.profile);

    let handle = session::start(&state.config, &id, &input_url, params.profile);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(handle.body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    impl ChannelSource for FixedSource {
        fn stream_url(&self, channel_id: i64) -> anyhow::Result<Option<String>> {
            Ok((channel_id == 1).then(|| "http://upstream/live.ts".to_string()))
        }
    }

    #[test]
    fn test_create_router() {
        let config = StreamConfig::new(
            std::env::temp_dir().join("tvbridge-stream-test"),
            std::path::PathBuf::from("ffmpeg"),
        );
        let _router = create_router(config, Arc::new(FixedSource));
    }
}
