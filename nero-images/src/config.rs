use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, specta::Type)]
#[serde(default)]
/// Where images live and how hard to try before settling on the placeholder
pub struct ImageConfig {
    /// Storage bucket holding uploaded images, [None] serves everything from `local_base`
    pub storage_bucket: Option<String>,
    /// Shown whenever the real image can't be
    pub placeholder: String,
    /// Directory bundled images are served from
    pub local_base: String,
    /// Extra existence checks after one fails to get an answer
    pub retry_attempts: u32,
    pub retry_delay_ms: u32,
}

impl ImageConfig {
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        Self {
            storage_bucket: Some(bucket.into()),
            ..Default::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms as u64)
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            storage_bucket: None,
            placeholder: "/assets/images/ui/placeholder.png".to_string(),
            local_base: "/assets/images".to_string(),
            retry_attempts: 2,
            retry_delay_ms: 1_000,
        }
    }
}
