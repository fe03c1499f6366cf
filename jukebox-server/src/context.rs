use std::sync::Arc;

use axum::extract::FromRef;
use jukebox_collab::Collab;

use crate::sse::ServerSentEvents;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
    pub sse: Arc<ServerSentEvents>,
}
