use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::{errors, rooms, schemas, serialized, sse, time};

#[derive(OpenApi)]
#[openapi(
    paths(
        rooms::queue,
        rooms::perform_command,
        sse::event_stream,
        time::server_time,
    ),
    components(schemas(
        errors::ErrorBody,
        schemas::CommandAction,
        schemas::CommandSchema,
        serialized::Track,
        serialized::Song,
        serialized::QueuedSong,
        serialized::Vote,
        serialized::PlaybackState,
        serialized::Playback,
        serialized::Room,
        serialized::RoomState,
        serialized::VoteResult,
        serialized::CommandResultKind,
        serialized::CommandResult,
        serialized::ServerTime,
        sse::ServerEvent,
    )),
    info(description = "jukebox-server exposes the room queues and their realtime events")
)]
pub struct ApiDoc;

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
