use std::{collections::HashMap, sync::Arc};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};

use crate::{check::ImageCheck, config::ImageConfig, prelude::*, url::storage_url};

/// Folders uploaded images are sorted into, anything else is assumed to be a landmark
const STORAGE_FOLDERS: [&str; 2] = ["landmarks/", "restaurants/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum ImageSource {
    /// Already a URL, passed through untouched
    Direct,
    /// Found in the storage bucket
    Storage,
    /// Bundled with the app
    Local,
    /// The real image is missing or couldn't be checked
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub struct ResolvedImage {
    pub url: String,
    pub source: ImageSource,
}

fn is_direct(path: &str) -> bool {
    path.starts_with("http://")
        || path.starts_with("https://")
        || path.starts_with("//")
        || path.starts_with('/')
}

fn storage_path(path: &str) -> String {
    if STORAGE_FOLDERS.iter().any(|f| path.starts_with(f)) {
        path.to_string()
    } else {
        format!("{}{path}", STORAGE_FOLDERS[0])
    }
}

/// Turns the image paths stored with landmarks and restaurants into something the UI can
/// load. Existence answers are remembered until [ImageResolver::clear_cache].
pub struct ImageResolver<C: ImageCheck> {
    check: C,
    config: ImageConfig,
    known: Mutex<HashMap<String, Arc<OnceCell<bool>>>>,
}

impl<C: ImageCheck> ImageResolver<C> {
    pub fn new(check: C, config: ImageConfig) -> Self {
        if config.storage_bucket.is_none() {
            info!("No storage bucket configured, serving bundled images");
        }
        Self {
            check,
            config,
            known: Mutex::default(),
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    fn placeholder(&self) -> ResolvedImage {
        ResolvedImage {
            url: self.config.placeholder.clone(),
            source: ImageSource::Placeholder,
        }
    }

    pub async fn resolve(&self, path: &str) -> ResolvedImage {
        let path = path.trim();

        if path.is_empty() {
            return self.placeholder();
        }

        if is_direct(path) {
            return ResolvedImage {
                url: path.to_string(),
                source: ImageSource::Direct,
            };
        }

        let Some(bucket) = self.config.storage_bucket.as_deref() else {
            return ResolvedImage {
                url: format!("{}/{path}", self.config.local_base.trim_end_matches('/')),
                source: ImageSource::Local,
            };
        };

        let path = storage_path(path);
        let url = storage_url(bucket, &path);

        if self.exists(&path, &url).await {
            ResolvedImage {
                url,
                source: ImageSource::Storage,
            }
        } else {
            debug!("Image {path} not available, using placeholder");
            self.placeholder()
        }
    }

    /// Concurrent lookups of the same path share one check. A check that never got an
    /// answer isn't remembered.
    async fn exists(&self, path: &str, url: &str) -> bool {
        let cell = self
            .known
            .lock()
            .await
            .entry(path.to_string())
            .or_default()
            .clone();

        match cell.get_or_try_init(|| self.check_with_retry(url)).await {
            Ok(exists) => *exists,
            Err(why) => {
                warn!("Could not check image {path}: {why:#}");
                false
            }
        }
    }

    async fn check_with_retry(&self, url: &str) -> Result<bool> {
        let mut attempt = 0;
        loop {
            match self.check.exists(url).await {
                Ok(exists) => return Ok(exists),
                Err(why) if attempt < self.config.retry_attempts => {
                    attempt += 1;
                    debug!("Image check failed ({why:#}), retry {attempt}");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(why) => return Err(why),
            }
        }
    }

    /// Forget every existence answer so the next lookups check again
    pub async fn clear_cache(&self) {
        self.known.lock().await.clear();
        info!("Image cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use anyhow::anyhow;
    use tokio::{test, time::Instant};

    use super::*;

    const BUCKET: &str = "nero-app.appspot.com";

    /// Answers from a script, [Ok(true)] once it runs out
    #[derive(Default)]
    struct MockCheck {
        replies: StdMutex<VecDeque<Result<bool>>>,
        calls: AtomicU32,
        last_url: StdMutex<Option<String>>,
        delay: Option<Duration>,
    }

    impl MockCheck {
        fn replying(replies: impl IntoIterator<Item = Result<bool>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into_iter().collect()),
                ..Default::default()
            }
        }
    }

    impl ImageCheck for MockCheck {
        async fn exists(&self, url: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock().unwrap() = Some(url.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let reply = self.replies.lock().unwrap().pop_front();
            reply.unwrap_or(Ok(true))
        }
    }

    fn resolver(check: MockCheck) -> ImageResolver<MockCheck> {
        ImageResolver::new(check, ImageConfig::with_bucket(BUCKET))
    }

    fn calls(resolver: &ImageResolver<MockCheck>) -> u32 {
        resolver.check.calls.load(Ordering::SeqCst)
    }

    #[test]
    async fn test_empty_path_is_placeholder() {
        let r = resolver(MockCheck::default());
        let image = r.resolve("  ").await;
        assert_eq!(image.source, ImageSource::Placeholder);
        assert_eq!(image.url, "/assets/images/ui/placeholder.png");
        assert_eq!(calls(&r), 0);
    }

    #[test]
    async fn test_urls_pass_through() {
        let r = resolver(MockCheck::default());
        for url in [
            "https://example.com/a.png",
            "http://example.com/a.png",
            "//cdn.example.com/a.png",
            "/assets/images/ui/logo.png",
        ] {
            assert_eq!(
                r.resolve(url).await,
                ResolvedImage {
                    url: url.to_string(),
                    source: ImageSource::Direct
                }
            );
        }
        assert_eq!(calls(&r), 0);
    }

    #[test]
    async fn test_no_bucket_serves_bundled() {
        let r = ImageResolver::new(MockCheck::default(), ImageConfig::default());
        let image = r.resolve("landmarks/namsan.jpg").await;
        assert_eq!(image.source, ImageSource::Local);
        assert_eq!(image.url, "/assets/images/landmarks/namsan.jpg");
        assert_eq!(calls(&r), 0);
    }

    #[test]
    async fn test_bare_names_go_to_landmarks() {
        let r = resolver(MockCheck::default());

        let image = r.resolve("namsan.jpg").await;
        assert_eq!(image.source, ImageSource::Storage);
        assert_eq!(image.url, storage_url(BUCKET, "landmarks/namsan.jpg"));
        assert_eq!(
            r.check.last_url.lock().unwrap().as_deref(),
            Some(image.url.as_str())
        );

        let image = r.resolve("restaurants/eid.jpg").await;
        assert_eq!(image.url, storage_url(BUCKET, "restaurants/eid.jpg"));
    }

    #[test]
    async fn test_missing_image_remembered() {
        let r = resolver(MockCheck::replying([Ok(false)]));

        assert_eq!(r.resolve("gone.jpg").await.source, ImageSource::Placeholder);
        assert_eq!(r.resolve("gone.jpg").await.source, ImageSource::Placeholder);
        // Same object under its full path
        assert_eq!(
            r.resolve("landmarks/gone.jpg").await.source,
            ImageSource::Placeholder
        );
        assert_eq!(calls(&r), 1);

        r.clear_cache().await;
        assert_eq!(r.resolve("gone.jpg").await.source, ImageSource::Storage);
        assert_eq!(calls(&r), 2);
    }

    #[test(start_paused = true)]
    async fn test_failed_checks_retried() {
        let r = resolver(MockCheck::replying([
            Err(anyhow!("offline")),
            Err(anyhow!("offline")),
            Ok(true),
        ]));

        let start = Instant::now();
        let image = r.resolve("namsan.jpg").await;
        assert_eq!(image.source, ImageSource::Storage);
        assert_eq!(calls(&r), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test(start_paused = true)]
    async fn test_unanswered_check_not_remembered() {
        let r = resolver(MockCheck::replying([
            Err(anyhow!("offline")),
            Err(anyhow!("offline")),
            Err(anyhow!("offline")),
        ]));

        assert_eq!(r.resolve("namsan.jpg").await.source, ImageSource::Placeholder);
        assert_eq!(calls(&r), 3);

        // Back online, so the next lookup asks again
        assert_eq!(r.resolve("namsan.jpg").await.source, ImageSource::Storage);
        assert_eq!(calls(&r), 4);
    }

    #[test(start_paused = true)]
    async fn test_concurrent_lookups_share_check() {
        let r = resolver(MockCheck {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });

        let (a, b) = tokio::join!(r.resolve("namsan.jpg"), r.resolve("landmarks/namsan.jpg"));
        assert_eq!(a, b);
        assert_eq!(a.source, ImageSource::Storage);
        assert_eq!(calls(&r), 1);
    }
}
