use std::path::Path;

use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub mod db;
pub mod xtream;

pub use db::{Library, NewPlaylist, Playlist, PlaylistKind};

use tvbridge_stream_server::ChannelSource;

impl ChannelSource for Library {
    fn stream_url(&self, channel_id: i64) -> anyhow::Result<Option<String>> {
        self.channel_stream_url(channel_id)
    }
}

#[derive(Clone)]
pub struct LibraryState {
    pub library: Library,
    http: reqwest::Client,
}

pub fn create_router(library: Library) -> Router {
    let state = LibraryState {
        library,
        http: reqwest::Client::new(),
    };

    Router::new()
        .route("/playlists", get(list_playlists).post(create_playlist))
        .route(
            "/playlists/{id}",
            get(get_playlist).put(update_playlist).delete(delete_playlist),
        )
        .route("/playlists/{id}/import", post(import_playlist))
        .route("/playlists/{id}/categories", get(list_categories))
        .route("/categories/{id}/active", put(set_category_active))
        .route("/categories/{id}/channels", get(list_channels))
        .with_state(state)
}

async fn list_playlists(
    State(state): State<LibraryState>,
) -> Result<Json<Vec<Playlist>>, StatusCode> {
    state.library.list_playlists().map(Json).map_err(internal)
}

async fn create_playlist(
    State(state): State<LibraryState>,
    Json(new): Json<NewPlaylist>,
) -> Result<Json<Playlist>, StatusCode> {
    state.library.create_playlist(&new).map(Json).map_err(internal)
}

async fn get_playlist(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Playlist>, StatusCode> {
    state
        .library
        .get_playlist(id)
        .map_err(internal)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_playlist(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
    Json(new): Json<NewPlaylist>,
) -> Result<StatusCode, StatusCode> {
    match state.library.update_playlist(id, &new).map_err(internal)? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(StatusCode::NOT_FOUND),
    }
}

async fn delete_playlist(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<StatusCode, StatusCode> {
    match state.library.delete_playlist(id).map_err(internal)? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Serialize)]
struct ImportResponse {
    playlist_id: i64,
    status: String,
}

/// Kicks off a lineup import as a detached task; progress is visible through
/// the playlist's `import_status` field.
async fn import_playlist(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<ImportResponse>, StatusCode> {
    let playlist = state
        .library
        .get_playlist(id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    tokio::spawn(run_import(state.clone(), playlist));

    Ok(Json(ImportResponse {
        playlist_id: id,
        status: "started".to_string(),
    }))
}

async fn run_import(state: LibraryState, playlist: Playlist) {
    let id = playlist.id;
    if let Err(err) = state
        .library
        .set_import_status(id, db::import_status::RUNNING)
    {
        error!("Failed to mark import running for playlist {id}: {err:#}");
        return;
    }

    let result = async {
        let (categories, channels) = xtream::fetch_live_lineup(
            &state.http,
            &playlist.server,
            &playlist.username,
            &playlist.password,
        )
        .await?;
        info!(
            "Playlist {id}: fetched {} categories, {} channels",
            categories.len(),
            channels.len()
        );
        state.library.apply_import(&playlist, &categories, &channels)
    }
    .await;

    let status = match result {
        Ok(()) => {
            info!("Playlist {id}: import complete");
            db::import_status::DONE
        }
        Err(err) => {
            error!("Playlist {id}: import failed: {err:#}");
            db::import_status::FAILED
        }
    };
    if let Err(err) = state.library.set_import_status(id, status) {
        error!("Failed to record import status for playlist {id}: {err:#}");
    }
}

async fn list_categories(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Vec<db::Category>>, StatusCode> {
    state.library.list_categories(id).map(Json).map_err(internal)
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    active: bool,
}

async fn set_category_active(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<SetActiveRequest>,
) -> Result<StatusCode, StatusCode> {
    match state
        .library
        .set_category_active(id, req.active)
        .map_err(internal)?
    {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(StatusCode::NOT_FOUND),
    }
}

async fn list_channels(
    State(state): State<LibraryState>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<Vec<db::Channel>>, StatusCode> {
    state.library.list_channels(id).map(Json).map_err(internal)
}

fn internal(err: anyhow::Error) -> StatusCode {
    error!("library operation failed: {err:#}");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Opens (or creates) the channel store under `data_dir`.
pub fn open_library(data_dir: &Path) -> anyhow::Result<Library> {
    Library::open(&data_dir.join("library.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_router() {
        let library = Library::open_in_memory().expect("open");
        let _router = create_router(library);
    }

    #[test]
    fn library_implements_channel_source() {
        let library = Library::open_in_memory().expect("open");
        let source: &dyn ChannelSource = &library;
        assert!(source.stream_url(1).expect("lookup").is_none());
    }
}
