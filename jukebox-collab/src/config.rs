use std::time::Duration;

/// The configuration of the collaboration layer
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// How many tracks to request from the metadata provider at once
    pub metadata_batch_size: usize,
    /// How long to wait between two metadata batches
    pub metadata_batch_pacing: Duration,
    /// How many times a failed metadata batch is attempted in total
    pub metadata_retry_attempts: u32,
    /// The delay before the first retry, grows linearly with each attempt
    pub metadata_retry_backoff: Duration,
    /// How long a single metadata request may take
    pub metadata_request_timeout: Duration,
}

impl CollabConfig {
    /// The largest batch the upstream API accepts
    pub const MAX_BATCH_SIZE: usize = 100;

    /// Returns the batch size, clamped to what the upstream API accepts
    pub fn batch_size(&self) -> usize {
        self.metadata_batch_size.clamp(1, Self::MAX_BATCH_SIZE)
    }

    /// Returns how long to wait before the given retry, counting from 1
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.metadata_retry_backoff * attempt
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            metadata_batch_size: 50,
            // Keeps bulk hydration under the upstream rate limit
            metadata_batch_pacing: Duration::from_millis(250),
            metadata_retry_attempts: 3,
            metadata_retry_backoff: Duration::from_secs(5),
            metadata_request_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_is_clamped() {
        let mut config = CollabConfig::default();
        assert_eq!(config.batch_size(), 50);

        config.metadata_batch_size = 0;
        assert_eq!(config.batch_size(), 1, "Batches are never empty");

        config.metadata_batch_size = 500;
        assert_eq!(config.batch_size(), CollabConfig::MAX_BATCH_SIZE);
    }

    #[test]
    fn test_retry_delay_grows_linearly() {
        let config = CollabConfig::default();

        assert_eq!(config.retry_delay(1), Duration::from_secs(5));
        assert_eq!(config.retry_delay(3), Duration::from_secs(15));
    }
}
