use std::time::Duration;

use anyhow::{anyhow, Context};
use jukebox_collab::{CollabConfig, SPOTIFY_API_BASE};
use jukebox_server::DEFAULT_PORT;

/// Everything the binary reads from its environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub metadata_url: String,
    /// Without one, the metadata provider rejects every request
    pub metadata_token: Option<String>,
    /// Show debug messages of the jukebox crates
    pub verbose: bool,
    pub collab: CollabConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        let port = lookup("JUKEBOX_SERVER_PORT")
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("JUKEBOX_SERVER_PORT must be a port number")?
            .unwrap_or(DEFAULT_PORT);

        let mut collab = CollabConfig::default();

        if let Some(size) = lookup("JUKEBOX_METADATA_BATCH_SIZE") {
            collab.metadata_batch_size = size
                .parse()
                .context("JUKEBOX_METADATA_BATCH_SIZE must be a number")?;
        }

        if let Some(secs) = lookup("JUKEBOX_METADATA_TIMEOUT_SECS") {
            let secs = secs
                .parse()
                .context("JUKEBOX_METADATA_TIMEOUT_SECS must be a number")?;
            collab.metadata_request_timeout = Duration::from_secs(secs);
        }

        let verbose = lookup("JUKEBOX_LOG_VERBOSE").is_some_and(|v| v == "1" || v == "true");

        Ok(Self {
            database_url,
            port,
            metadata_url: lookup("JUKEBOX_METADATA_URL")
                .unwrap_or_else(|| SPOTIFY_API_BASE.to_string()),
            metadata_token: lookup("JUKEBOX_METADATA_TOKEN").filter(|t| !t.is_empty()),
            verbose,
            collab,
        })
    }
}
