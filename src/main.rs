use std::sync::Arc;

use jukebox_collab::{
    ChannelDispatcher, Collab, CollabContext, PgDatabase, SpotifyMetadataProvider,
};
use jukebox_core::SystemClock;
use log::{info, warn};

mod logging;
mod settings;

use settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    logging::init_logger(settings.verbose)?;

    info!("Connecting to database...");
    let database = PgDatabase::new(&settings.database_url).await?;
    database.migrate().await?;

    if settings.metadata_token.is_none() {
        warn!("JUKEBOX_METADATA_TOKEN is not set, track metadata can't be fetched");
    }

    let metadata = SpotifyMetadataProvider::new(
        settings.metadata_url.clone(),
        settings.metadata_token.clone().unwrap_or_default(),
        settings.collab.metadata_request_timeout,
    )?;

    let (dispatcher, events) = ChannelDispatcher::new();

    let collab = Arc::new(Collab::new(CollabContext {
        database: Arc::new(database),
        metadata: Arc::new(metadata),
        dispatcher: Arc::new(dispatcher),
        clock: Arc::new(SystemClock::new()),
        config: settings.collab.clone(),
    }));

    info!("Starting server on port {}...", settings.port);

    tokio::select! {
        result = jukebox_server::run_server(collab.clone(), events, settings.port) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    collab.shutdown().await?;
    info!("Goodbye");

    Ok(())
}
