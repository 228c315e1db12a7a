use crate::prelude::*;

/// Asks whether an image is actually there before the UI tries to show it
pub trait ImageCheck: Send + Sync {
    /// `Ok(false)` for a definite miss, `Err` when the answer couldn't be obtained
    fn exists(&self, url: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Checks with a `HEAD` request, any 2xx counts as present
pub struct HttpCheck {
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl ImageCheck for HttpCheck {
    async fn exists(&self, url: &str) -> Result<bool> {
        self.client
            .head(url)
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .context("Failed to make request")
    }
}
