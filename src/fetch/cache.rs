use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use super::FetchError;

/// One cache slot: empty while the first fetch is in flight, then holding
/// either the body or the failure. Waiters share the in-flight fetch.
type Slot = Arc<OnceCell<Result<Arc<str>, FetchError>>>;

/// Session-scoped, URL-keyed cache of downloaded bodies.
///
/// Concurrent requests for the same URL collapse onto a single fetch.
/// Failures are cached like successes for the lifetime of the session.
#[derive(Default)]
pub struct ContentCache {
    documents: Mutex<HashMap<String, Slot>>,
    media: Mutex<HashMap<String, Slot>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text body for `url`, running `fetch` only on the first request.
    pub async fn document<F, Fut>(&self, url: &str, fetch: F) -> Result<Arc<str>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, FetchError>>,
    {
        let slot = slot_for(&self.documents, url).await;
        slot.get_or_init(|| async {
            debug!(url, "cache miss");
            fetch().await.map(Arc::from)
        })
        .await
        .clone()
    }

    /// Media blob for `url` encoded as a data URL. `fetch` produces the
    /// encoded string.
    pub async fn media<F, Fut>(&self, url: &str, fetch: F) -> Result<Arc<str>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, FetchError>>,
    {
        let slot = slot_for(&self.media, url).await;
        slot.get_or_init(|| async {
            debug!(url, "media cache miss");
            fetch().await.map(Arc::from)
        })
        .await
        .clone()
    }

    pub async fn clear(&self) {
        self.documents.lock().await.clear();
        self.media.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len() + self.media.lock().await.len()
    }
}

async fn slot_for(map: &Mutex<HashMap<String, Slot>>, url: &str) -> Slot {
    let mut map = map.lock().await;
    map.entry(url.to_string()).or_default().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = ContentCache::new();
        let calls = AtomicUsize::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, FetchError>("body".to_string())
        };

        let (a, b) = tokio::join!(
            cache.document("https://example.test/a.md", fetch),
            cache.document("https://example.test/a.md", fetch),
        );

        assert_eq!(&*a.unwrap(), "body");
        assert_eq!(&*b.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached_for_the_session() {
        let cache = ContentCache::new();
        let calls = AtomicUsize::new(0);
        let url = "https://example.test/missing.md";

        for _ in 0..2 {
            let result = cache
                .document(url, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Status {
                        url: url.to_string(),
                        status: 404,
                    })
                })
                .await;
            assert!(result.unwrap_err().is_not_found());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let cache = ContentCache::new();
        let calls = AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FetchError>("v".to_string())
        };

        cache.document("u", fetch).await.unwrap();
        cache.media("m", fetch).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert_eq!(cache.len().await, 0);

        cache.document("u", fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_documents_and_media_are_separate() {
        let cache = ContentCache::new();
        let doc = cache
            .document("same", || async { Ok::<_, FetchError>("text".to_string()) })
            .await
            .unwrap();
        let media = cache
            .media("same", || async { Ok::<_, FetchError>("data:x".to_string()) })
            .await
            .unwrap();
        assert_eq!(&*doc, "text");
        assert_eq!(&*media, "data:x");
    }
}
