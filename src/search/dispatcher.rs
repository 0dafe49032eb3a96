//! Rate-limit gate around the search provider
//!
//! The gate has two states. While open, cache misses go straight to the
//! provider. When the provider answers with a rate-limit error the gate closes
//! until the advertised reset time; searches arriving in the meantime wait in a
//! FIFO queue and are dispatched one at a time once the reset task reopens the
//! gate.
//!
//! The request that trips the limit receives the rate-limit error itself and is
//! not queued. Only requests arriving after the transition are held back.

use super::models::TweetsPayload;
use crate::cache::ResponseCache;
use crate::config::DispatcherSettings;
use crate::error::SearchError;
use crate::metrics::Metrics;
use crate::provider::{ProviderError, SearchProvider};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<TweetsPayload, SearchError>>;
type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Longest sleep handed to the timer when a reset lies beyond `Instant` range
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A search parked while the gate is closed
struct QueuedRequest {
    query: String,
    reply: Reply,
}

/// The closed period of the gate
struct RateLimitWindow {
    reset_at: DateTime<Utc>,
    /// Cancels the pending reset task when a newer window replaces this one
    token: CancellationToken,
}

#[derive(Default)]
struct Gate {
    window: Option<RateLimitWindow>,
    queue: VecDeque<QueuedRequest>,
    draining: bool,
}

/// Observable gate state
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub rate_limited: bool,
    pub reset_at: Option<DateTime<Utc>>,
    pub queue_len: usize,
}

struct Inner {
    provider: Arc<dyn SearchProvider>,
    cache: Arc<ResponseCache>,
    metrics: Metrics,
    settings: DispatcherSettings,
    gate: Mutex<Gate>,
}

/// Cache-first, rate-limit aware search dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        cache: Arc<ResponseCache>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                cache,
                metrics: Metrics::new(),
                settings,
                gate: Mutex::new(Gate::default()),
            }),
        }
    }

    /// Search for `query`.
    ///
    /// Returns the cached payload when fresh, otherwise calls the provider or,
    /// while rate limited, waits in the queue until the gate reopens.
    pub async fn submit(&self, query: &str) -> Result<TweetsPayload, SearchError> {
        let inner = &self.inner;
        if query.trim().is_empty() {
            return Err(SearchError::Validation);
        }
        inner.metrics.inc_search();

        if let Some(hit) = inner.cache.get(query).await {
            inner.metrics.record_cache_hit();
            debug!("Cache hit for '{}'", query);
            return Ok(hit);
        }
        inner.metrics.record_cache_miss();

        let parked = {
            let mut gate = inner.gate.lock().await;
            if gate.window.is_some() {
                let (tx, rx) = oneshot::channel();
                gate.queue.push_back(QueuedRequest {
                    query: query.to_string(),
                    reply: tx,
                });
                inner.metrics.record_queued();
                debug!("Rate limited, queued '{}' ({} waiting)", query, gate.queue.len());
                Some(rx)
            } else {
                None
            }
        };

        match parked {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(SearchError::Upstream("queued request was dropped".to_string()))
            }),
            None => inner.dispatch(query).await,
        }
    }

    pub async fn is_rate_limited(&self) -> bool {
        self.inner.gate.lock().await.window.is_some()
    }

    pub async fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .gate
            .lock()
            .await
            .window
            .as_ref()
            .map(|w| w.reset_at)
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.gate.lock().await.queue.len()
    }

    pub async fn status(&self) -> GateStatus {
        let gate = self.inner.gate.lock().await;
        GateStatus {
            rate_limited: gate.window.is_some(),
            reset_at: gate.window.as_ref().map(|w| w.reset_at),
            queue_len: gate.queue.len(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }
}

impl Inner {
    /// Call the provider once and apply the outcome
    async fn dispatch(self: &Arc<Self>, query: &str) -> Result<TweetsPayload, SearchError> {
        self.metrics.record_provider_call();

        let outcome = timeout(
            self.settings.provider_timeout(),
            self.provider.search(query),
        )
        .await;

        match outcome {
            Ok(Ok(page)) => {
                let payload = TweetsPayload::from_page(page);
                debug!("Provider returned {} tweets for '{}'", payload.len(), query);
                self.cache.put_default(query, payload.clone()).await;
                Ok(payload)
            }
            Ok(Err(ProviderError::RateLimited { reset_at })) => {
                let reset_at = self.close_gate(reset_at).await;
                Err(SearchError::RateLimited { reset_at })
            }
            Ok(Err(e)) => {
                self.metrics.record_provider_error();
                warn!("Error fetching tweets for '{}': {}", query, e);
                Err(SearchError::from_provider(e))
            }
            Err(_) => {
                self.metrics.record_provider_error();
                warn!(
                    "Provider call for '{}' timed out after {:?}",
                    query,
                    self.settings.provider_timeout()
                );
                Err(SearchError::Upstream("provider call timed out".to_string()))
            }
        }
    }

    /// Reset time assumed when the provider gives none, saturating on overflow
    fn fallback_reset_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.settings.fallback_reset())
            .ok()
            .and_then(|window| Utc::now().checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Enter the limited state and schedule the single reset task
    async fn close_gate(self: &Arc<Self>, reset_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let reset_at = reset_at.unwrap_or_else(|| self.fallback_reset_at());
        let token = CancellationToken::new();

        {
            let mut gate = self.gate.lock().await;
            if let Some(stale) = gate.window.take() {
                stale.token.cancel();
            }
            gate.window = Some(RateLimitWindow {
                reset_at,
                token: token.clone(),
            });
        }

        self.metrics.record_rate_limit();
        warn!("Rate limit exceeded. Waiting until: {}", reset_at);

        let wait = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now()
            .checked_add(wait)
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Superseded reset task cancelled");
                }
                _ = sleep_until(deadline) => {
                    inner.reopen(token.clone()).await;
                }
            }
        });

        reset_at
    }

    /// Leave the limited state, then drain unless a drain is already running
    ///
    /// Boxed because draining may close the gate again and spawn another reset.
    fn reopen(self: Arc<Self>, token: CancellationToken) -> BoxedTask {
        Box::pin(async move {
            let waiting = {
                let mut gate = self.gate.lock().await;
                // Replaced under the lock, so a cancelled token means a newer window
                if token.is_cancelled() {
                    return;
                }
                gate.window = None;
                if gate.draining {
                    return;
                }
                gate.draining = true;
                gate.queue.len()
            };

            info!("Rate limit window elapsed, draining {} queued requests", waiting);
            self.drain().await;
        })
    }

    async fn drain(self: &Arc<Self>) {
        loop {
            let next = {
                let mut gate = self.gate.lock().await;
                let next = if gate.window.is_some() {
                    None
                } else {
                    gate.queue.pop_front()
                };
                if next.is_none() {
                    gate.draining = false;
                }
                next
            };
            let Some(request) = next else {
                break;
            };

            self.metrics.record_drained();

            // An earlier queued search for the same text may have filled it.
            // Not counted as a lookup: submit already recorded this one's miss.
            let result = match self.cache.get(&request.query).await {
                Some(hit) => Ok(hit),
                None => self.dispatch(&request.query).await,
            };

            if request.reply.send(result).is_err() {
                debug!("Caller for '{}' went away, result discarded", request.query);
            }
        }

        debug!("Drain finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderItem, ProviderPage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Provider replaying scripted outcomes, then echoing the query
    #[derive(Default)]
    struct ScriptedProvider {
        script: StdMutex<VecDeque<Result<ProviderPage, ProviderError>>>,
        calls: StdMutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderPage, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn search(&self, query: &str) -> Result<ProviderPage, ProviderError> {
            self.calls.lock().unwrap().push(query.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(echo_page(query)))
        }
    }

    fn echo_page(query: &str) -> ProviderPage {
        let mut users = HashMap::new();
        users.insert("1".to_string(), "alice".to_string());
        ProviderPage {
            items: vec![ProviderItem {
                id: "100".to_string(),
                author_id: "1".to_string(),
                text: format!("about {}", query),
                created_at: None,
            }],
            users,
        }
    }

    fn limited_for(secs: i64) -> Result<ProviderPage, ProviderError> {
        Err(ProviderError::RateLimited {
            reset_at: Some(Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    fn dispatcher(provider: Arc<ScriptedProvider>) -> Dispatcher {
        Dispatcher::new(
            provider,
            Arc::new(ResponseCache::default()),
            DispatcherSettings::default(),
        )
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_provider() {
        let provider = ScriptedProvider::new(vec![]);
        let dispatcher = dispatcher(provider.clone());
        let cached = TweetsPayload::from_page(echo_page("cached"));
        dispatcher.cache().put_default("rust", cached.clone()).await;

        let result = dispatcher.submit("rust").await.unwrap();

        assert_eq!(result, cached);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_calls_provider_and_fills_cache() {
        let provider = ScriptedProvider::new(vec![]);
        let dispatcher = dispatcher(provider.clone());

        let first = dispatcher.submit("rust").await.unwrap();
        assert_eq!(first.tweets[0].url, "https://twitter.com/alice/status/100");

        let second = dispatcher.submit("rust").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls(), vec!["rust"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_query_rejected() {
        let provider = ScriptedProvider::new(vec![]);
        let dispatcher = dispatcher(provider.clone());

        for query in ["", "   ", "\t\n"] {
            let err = dispatcher.submit(query).await.unwrap_err();
            assert!(matches!(err, SearchError::Validation));
        }
        assert!(provider.calls().is_empty());
        assert_eq!(dispatcher.cache().len().await, 0);
        assert_eq!(dispatcher.metrics().snapshot().searches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_closes_gate_and_drops_trigger() {
        let provider = ScriptedProvider::new(vec![limited_for(60)]);
        let dispatcher = dispatcher(provider.clone());

        let err = dispatcher.submit("trigger").await.unwrap_err();
        assert!(matches!(err, SearchError::RateLimited { .. }));
        assert!(dispatcher.is_rate_limited().await);
        assert!(dispatcher.reset_at().await.is_some());
        // The triggering request is not parked
        assert_eq!(dispatcher.queue_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_request_dispatched_after_reset() {
        let provider = ScriptedProvider::new(vec![limited_for(60)]);
        let dispatcher = dispatcher(provider.clone());
        let _ = dispatcher.submit("trigger").await;

        let d = dispatcher.clone();
        let waiting = tokio::spawn(async move { d.submit("later").await });
        settle().await;

        assert_eq!(dispatcher.queue_len().await, 1);
        assert!(!waiting.is_finished());
        assert_eq!(provider.calls(), vec!["trigger"]);

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = waiting.await.unwrap().unwrap();

        assert_eq!(result.tweets[0].text, "about later");
        assert_eq!(provider.calls(), vec!["trigger", "later"]);
        assert!(!dispatcher.is_rate_limited().await);
        assert_eq!(dispatcher.queue_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_fifo() {
        let provider = ScriptedProvider::new(vec![limited_for(30)]);
        let dispatcher = dispatcher(provider.clone());
        let _ = dispatcher.submit("trigger").await;

        let d1 = dispatcher.clone();
        let q1 = tokio::spawn(async move { d1.submit("q1").await });
        settle().await;
        let d2 = dispatcher.clone();
        let q2 = tokio::spawn(async move { d2.submit("q2").await });
        settle().await;
        assert_eq!(dispatcher.queue_len().await, 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(q1.await.unwrap().is_ok());
        assert!(q2.await.unwrap().is_ok());

        assert_eq!(provider.calls(), vec!["trigger", "q1", "q2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_mid_drain_reschedules() {
        let provider = ScriptedProvider::new(vec![limited_for(30), limited_for(120)]);
        let dispatcher = dispatcher(provider.clone());
        let _ = dispatcher.submit("trigger").await;
        let first_reset = dispatcher.reset_at().await.unwrap();

        let d1 = dispatcher.clone();
        let q1 = tokio::spawn(async move { d1.submit("q1").await });
        settle().await;
        let d2 = dispatcher.clone();
        let q2 = tokio::spawn(async move { d2.submit("q2").await });
        settle().await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let err = q1.await.unwrap().unwrap_err();
        assert!(matches!(err, SearchError::RateLimited { .. }));

        // Draining stopped, q2 still waits behind the new window
        assert!(dispatcher.is_rate_limited().await);
        assert!(dispatcher.reset_at().await.unwrap() > first_reset);
        assert_eq!(dispatcher.queue_len().await, 1);
        assert!(!q2.is_finished());

        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(q2.await.unwrap().is_ok());
        assert_eq!(provider.calls(), vec!["trigger", "q1", "q2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_queued_queries_served_from_cache() {
        let provider = ScriptedProvider::new(vec![limited_for(10)]);
        let dispatcher = dispatcher(provider.clone());
        let _ = dispatcher.submit("trigger").await;

        let d1 = dispatcher.clone();
        let a = tokio::spawn(async move { d1.submit("same").await });
        settle().await;
        let d2 = dispatcher.clone();
        let b = tokio::spawn(async move { d2.submit("same").await });
        settle().await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(provider.calls(), vec!["trigger", "same"]);

        // One lookup per submit; the drain-time cache check is not another
        let snap = dispatcher.metrics().snapshot();
        assert_eq!(snap.searches, 3);
        assert_eq!(snap.cache_misses, 3);
        assert_eq!(snap.cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_rate_limit_replaces_pending_reset() {
        let provider = Arc::new(ScriptedProvider {
            script: StdMutex::new(vec![limited_for(10), limited_for(100)].into()),
            delay: Some(Duration::from_secs(1)),
            ..Default::default()
        });
        let dispatcher = dispatcher(provider.clone());

        // Both pass the open gate before either response arrives
        let (a, b) = tokio::join!(dispatcher.submit("a"), dispatcher.submit("b"));
        assert!(matches!(a, Err(SearchError::RateLimited { .. })));
        assert!(matches!(b, Err(SearchError::RateLimited { .. })));
        assert_eq!(dispatcher.metrics().snapshot().rate_limit_events, 2);

        let d = dispatcher.clone();
        let queued = tokio::spawn(async move { d.submit("q").await });
        settle().await;

        // The 10s window was superseded, so its timer must not reopen the gate
        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert!(dispatcher.is_rate_limited().await);
        assert_eq!(dispatcher.queue_len().await, 1);
        assert_eq!(provider.calls(), vec!["a", "b"]);
        assert!(!queued.is_finished());

        tokio::time::advance(Duration::from_secs(90)).await;
        queued.await.unwrap().unwrap();
        assert_eq!(provider.calls(), vec!["a", "b", "q"]);
        assert!(!dispatcher.is_rate_limited().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_leaves_gate_open() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Status(500))]);
        let dispatcher = dispatcher(provider.clone());

        let err = dispatcher.submit("rust").await.unwrap_err();

        assert!(matches!(err, SearchError::Upstream(_)));
        assert!(!dispatcher.is_rate_limited().await);
        assert!(dispatcher.cache().get("rust").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_surfaces() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::Malformed("no data".to_string()))]);
        let dispatcher = dispatcher(provider.clone());

        let err = dispatcher.submit("rust").await.unwrap_err();

        assert!(matches!(err, SearchError::MalformedUpstreamResponse(_)));
        assert!(!dispatcher.is_rate_limited().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_reset_uses_fallback_window() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::RateLimited { reset_at: None })]);
        let dispatcher = dispatcher(provider.clone());
        let before = Utc::now();

        let _ = dispatcher.submit("trigger").await;

        let reset_at = dispatcher.reset_at().await.unwrap();
        assert!(reset_at >= before + chrono::Duration::seconds(899));
        assert!(reset_at <= Utc::now() + chrono::Duration::seconds(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_fallback_window_saturates() {
        let provider =
            ScriptedProvider::new(vec![Err(ProviderError::RateLimited { reset_at: None })]);
        let dispatcher = Dispatcher::new(
            provider.clone(),
            Arc::new(ResponseCache::default()),
            DispatcherSettings {
                fallback_reset_seconds: u64::MAX,
                ..Default::default()
            },
        );

        let err = dispatcher.submit("trigger").await.unwrap_err();

        assert!(matches!(err, SearchError::RateLimited { .. }));
        assert!(dispatcher.is_rate_limited().await);
        assert_eq!(dispatcher.reset_at().await, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout() {
        let provider = Arc::new(ScriptedProvider {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let dispatcher = dispatcher(provider.clone());

        let err = dispatcher.submit("slow").await.unwrap_err();

        assert!(matches!(err, SearchError::Upstream(_)));
        assert!(!dispatcher.is_rate_limited().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_still_processed() {
        let provider = ScriptedProvider::new(vec![limited_for(5)]);
        let dispatcher = dispatcher(provider.clone());
        let _ = dispatcher.submit("trigger").await;

        let d = dispatcher.clone();
        let gone = tokio::spawn(async move { d.submit("abandoned").await });
        settle().await;
        gone.abort();

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;

        assert_eq!(provider.calls(), vec!["trigger", "abandoned"]);
        assert!(dispatcher.cache().get("abandoned").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_track_activity() {
        let provider = ScriptedProvider::new(vec![limited_for(5)]);
        let dispatcher = dispatcher(provider.clone());

        let _ = dispatcher.submit("trigger").await;
        let d = dispatcher.clone();
        let queued = tokio::spawn(async move { d.submit("q").await });
        settle().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        queued.await.unwrap().unwrap();
        dispatcher.submit("q").await.unwrap();

        let snap = dispatcher.metrics().snapshot();
        assert_eq!(snap.searches, 3);
        assert_eq!(snap.rate_limit_events, 1);
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.drained, 1);
        assert_eq!(snap.provider_calls, 2);
        assert_eq!(snap.cache_hits, 1);
    }
}
