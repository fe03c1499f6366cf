use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json,
};

use crate::{
    context::ServerContext,
    errors::{ErrorBody, ServerResult},
    schemas::{CommandSchema, ValidatedJson},
    serialized::{CommandResult, RoomState, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/queue",
    tag = "rooms",
    params(
        ("id" = i32, Path, description = "The room")
    ),
    responses(
        (status = 200, body = RoomState),
        (status = 404, body = ErrorBody)
    )
)]
async fn queue(
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<RoomState>> {
    let state = context.collab.queue_state(room_id).await?;

    Ok(Json(state.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/rooms/{id}/commands",
    tag = "rooms",
    request_body = CommandSchema,
    params(
        ("id" = i32, Path, description = "The room")
    ),
    responses(
        (status = 200, body = CommandResult, description = "The command was carried out"),
        (status = 400, body = ErrorBody, description = "The command is malformed"),
        (status = 403, body = ErrorBody, description = "The user may not do this"),
        (status = 404, body = ErrorBody, description = "The room, song or vote doesn't exist"),
        (status = 409, body = ErrorBody, description = "The room's state doesn't allow this"),
        (status = 503, body = ErrorBody, description = "Storage is unavailable")
    )
)]
async fn perform_command(
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<CommandSchema>,
) -> ServerResult<Json<CommandResult>> {
    let envelope = body.into_envelope(room_id)?;
    let outcome = context.collab.execute(envelope).await?;

    Ok(Json(outcome.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/:id/queue", get(queue))
        .route("/:id/commands", post(perform_command))
}
