mod context;
mod docs;
mod errors;
mod rooms;
mod schemas;
mod serialized;
mod sse;
mod time;

#[cfg(test)]
mod testing;

use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::routing::get;
use jukebox_collab::{Collab, EventReceiver};
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};
pub use sse::{ServerEvent, ServerSentEvents};

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router = axum::Router<ServerContext>;

/// Starts the jukebox server, forwarding the collab events to its realtime clients
pub async fn run_server(
    collab: Arc<Collab>,
    events: EventReceiver,
    port: u16,
) -> std::io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let sse = ServerSentEvents::new();
    sse.forward(events)?;

    let context = ServerContext { collab, sse };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/rooms", rooms::router().merge(sse::router()))
        .nest("/time", time::router());

    let root_router = Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, root_router).await
}
