use crate::args::ArgType;
use crate::persistence::{keys, load_or, Persistence};
use crate::sources::post::PostInfo;
use crate::traits::{PacketHandler, PostSource, Provider, ProviderState};
use crate::types::{Packet, PacketMetadata, RelayError, Result, SourceRef};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const KIND: &str = "danbooru";

/// Lower bound on the poll interval, to respect the source's rate limits
pub const MIN_INTERVAL_MS: u64 = 60_000;

const DEFAULT_INTERVAL_MS: u64 = 120_000;
const APPROVAL_BATCH_SIZE: usize = 10;
const APPROVAL_TTL_DAYS: i64 = 3;

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanbooruOptions {
    pub name: String,
    pub tags: Vec<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Hold pending posts back until a moderator approves them
    #[serde(default)]
    pub approved_only: bool,
    #[serde(default = "default_interval_ms")]
    pub approval_queue_interval_ms: u64,
}

impl DanbooruOptions {
    pub fn new(name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            interval_ms: DEFAULT_INTERVAL_MS,
            approved_only: false,
            approval_queue_interval_ms: DEFAULT_INTERVAL_MS,
        }
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_approved_only(mut self, approved_only: bool) -> Self {
        self.approved_only = approved_only;
        self
    }

    pub fn with_approval_queue_interval_ms(mut self, interval_ms: u64) -> Self {
        self.approval_queue_interval_ms = interval_ms;
        self
    }

    /// Argument schema for the provider catalog
    pub fn arguments() -> ArgType {
        ArgType::object(vec![
            ("name", ArgType::string().min_length(1)),
            ("tags", ArgType::array(ArgType::string())),
            ("interval_ms", ArgType::number().min(MIN_INTERVAL_MS as f64).optional()),
            ("approved_only", ArgType::boolean().optional()),
            ("approval_queue_interval_ms", ArgType::number().min(0.0).optional()),
        ])
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(RelayError::InvalidArguments {
                kind: KIND.to_string(),
                reason: format!(
                    "interval_ms must be at least {} (got {})",
                    MIN_INTERVAL_MS, self.interval_ms
                ),
            });
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Deliberately longer than the poll period so a fresh post is never
    /// handled by both loops in the same tick
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.approval_queue_interval_ms + self.interval_ms / 2)
    }
}

/// A pending post waiting for moderation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalQueueItem {
    pub id: u64,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PollState {
    last_id: Option<u64>,
    approval_queue: Vec<ApprovalQueueItem>,
}

struct RunControl {
    state: ProviderState,
    stop_tx: Option<watch::Sender<bool>>,
}

struct Inner {
    options: DanbooruOptions,
    source: Arc<dyn PostSource>,
    persistence: Arc<dyn Persistence>,
    // Held for the whole of a poll or sweep cycle, so cycles never overlap
    poll: Mutex<PollState>,
    handler: RwLock<Option<Arc<dyn PacketHandler>>>,
    control: Mutex<RunControl>,
}

/// Polls a booru for the newest post matching a tag query
pub struct DanbooruProvider {
    inner: Arc<Inner>,
}

impl DanbooruProvider {
    pub fn new(
        options: DanbooruOptions,
        source: Arc<dyn PostSource>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                options,
                source,
                persistence,
                poll: Mutex::new(PollState::default()),
                handler: RwLock::new(None),
                control: Mutex::new(RunControl {
                    state: ProviderState::Idle,
                    stop_tx: None,
                }),
            }),
        })
    }

    pub fn options(&self) -> &DanbooruOptions {
        &self.inner.options
    }

    pub async fn last_id(&self) -> Option<u64> {
        self.inner.poll.lock().await.last_id
    }

    pub async fn approval_queue(&self) -> Vec<ApprovalQueueItem> {
        self.inner.poll.lock().await.approval_queue.clone()
    }

    /// Run one poll cycle now
    pub async fn poll_once(&self) {
        self.inner.poll_at(Utc::now()).await;
    }

    /// Run one poll cycle as if the current time were `now`
    pub async fn poll_at(&self, now: DateTime<Utc>) {
        self.inner.poll_at(now).await;
    }

    /// Run one approval-queue sweep now
    pub async fn sweep_approval_queue(&self) {
        self.inner.sweep_at(Utc::now()).await;
    }

    /// Run one approval-queue sweep as if the current time were `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) {
        self.inner.sweep_at(now).await;
    }
}

impl Inner {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn poll_at(&self, now: DateTime<Utc>) {
        let mut state = self.poll.lock().await;
        info!("Provider {}: running iteration (last id {:?})", self.name(), state.last_id);

        let raw = match self.source.most_recent(&self.options.tags, state.last_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("Provider {}: checked but no new items", self.name());
                return;
            }
            Err(e) => {
                error!("Provider {}: fetch failed: {}", self.name(), e);
                return;
            }
        };

        let info = match PostInfo::from_raw(&raw, self.source.base_url()) {
            Ok(info) => info,
            Err(e) => {
                error!("Provider {}: discarding malformed post: {}", self.name(), e);
                return;
            }
        };

        if let Some(last_id) = state.last_id {
            if info.id <= last_id {
                warn!(
                    "Provider {}: ignoring post {} at or behind cursor {}",
                    self.name(),
                    info.id,
                    last_id
                );
                return;
            }
        }

        // The cursor moves even if the post is filtered below, so a bad head
        // post is never fetched again
        state.last_id = Some(info.id);
        self.persist(&keys::last_id(self.name()), serde_json::json!(info.id)).await;

        if self.route_post(&mut state, raw, info, now, None).await {
            self.persist_queue(&state).await;
        }
    }

    async fn sweep_at(&self, now: DateTime<Utc>) {
        let mut state = self.poll.lock().await;
        info!(
            "Provider {}: running approval queue iteration ({} items)",
            self.name(),
            state.approval_queue.len()
        );
        if state.approval_queue.is_empty() {
            return;
        }

        let batch_len = state.approval_queue.len().min(APPROVAL_BATCH_SIZE);
        let batch: Vec<ApprovalQueueItem> = state.approval_queue.drain(..batch_len).collect();
        let (live, expired): (Vec<_>, Vec<_>) = batch.into_iter().partition(|item| now < item.expires);
        for item in &expired {
            info!(
                "Provider {}: approval queue item {} expired at {}",
                self.name(),
                item.id,
                item.expires
            );
        }

        if !live.is_empty() {
            let ids: Vec<u64> = live.iter().map(|item| item.id).collect();
            match self.source.posts_with_ids(&ids).await {
                Ok(posts) => {
                    let mut seen = Vec::with_capacity(posts.len());
                    for raw in posts {
                        let info = match PostInfo::from_raw(&raw, self.source.base_url()) {
                            Ok(info) => info,
                            Err(e) => {
                                error!("Provider {}: discarding malformed post: {}", self.name(), e);
                                continue;
                            }
                        };
                        let Some(item) = live.iter().find(|item| item.id == info.id) else {
                            debug!("Provider {}: post {} was not requested", self.name(), info.id);
                            continue;
                        };
                        seen.push(info.id);
                        let expires = item.expires;
                        self.route_post(&mut state, raw, info, now, Some(expires)).await;
                    }
                    for item in live.iter().filter(|item| !seen.contains(&item.id)) {
                        warn!("Provider {}: post {} has gone missing", self.name(), item.id);
                    }
                }
                Err(e) => {
                    warn!("Provider {}: fetching posts {:?} failed: {}", self.name(), ids, e);
                    // Keep the batch at the head so the next sweep retries it
                    let rest = std::mem::replace(&mut state.approval_queue, live);
                    state.approval_queue.extend(rest);
                }
            }
        }

        self.persist_queue(&state).await;
    }

    /// Emit the post, queue it for approval, or discard it.
    /// Returns true when the approval queue changed.
    async fn route_post(
        &self,
        state: &mut PollState,
        raw: serde_json::Value,
        info: PostInfo,
        now: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> bool {
        if info.is_banned {
            warn!("Provider {}: post {} is banned", self.name(), info.id);
            return false;
        }
        if info.is_deleted {
            warn!("Provider {}: post {} is deleted", self.name(), info.id);
            return false;
        }
        if !info.has_media() {
            warn!(
                "Provider {}: post {} is missing file or preview url, was the artist banned?",
                self.name(),
                info.id
            );
            return false;
        }

        if self.options.approved_only && info.is_pending {
            let expires = expires.unwrap_or_else(|| now + ChronoDuration::days(APPROVAL_TTL_DAYS));
            info!(
                "Provider {}: post {} is pending, queued until {}",
                self.name(),
                info.id,
                expires
            );
            state.approval_queue.push(ApprovalQueueItem { id: info.id, expires });
            return true;
        }

        self.emit(raw, info).await;
        false
    }

    async fn emit(&self, raw: serde_json::Value, info: PostInfo) {
        let handler = self.handler.read().await.clone();
        let Some(handler) = handler else {
            warn!("Provider {}: no handler registered, dropping post {}", self.name(), info.id);
            return;
        };

        info!("Provider {}: providing post {}", self.name(), info.id);
        let packet = Packet::new(
            SourceRef {
                name: self.name().to_string(),
                kind: KIND.to_string(),
            },
            info.to_webhook(),
            PacketMetadata { raw, info },
        );
        handler.handle(packet).await;
    }

    async fn persist(&self, path: &str, value: serde_json::Value) {
        let result = async {
            self.persistence.set(path, value).await?;
            self.persistence.save().await
        }
        .await;
        if let Err(e) = result {
            error!("Provider {}: failed to persist {}: {}", self.name(), path, e);
        }
    }

    async fn persist_queue(&self, state: &PollState) {
        match serde_json::to_value(&state.approval_queue) {
            Ok(value) => self.persist(&keys::approval_queue(self.name()), value).await,
            Err(e) => error!("Provider {}: failed to encode approval queue: {}", self.name(), e),
        }
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>, cycle: F)
    where
        F: Fn(Arc<Inner>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *stop.borrow() {
                    break;
                }
                cycle(Arc::clone(&inner)).await;
            }
            debug!("Provider {}: loop stopped", inner.name());
        });
    }
}

#[async_trait]
impl Provider for DanbooruProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn args(&self) -> serde_json::Value {
        serde_json::to_value(&self.inner.options).unwrap_or_default()
    }

    async fn state(&self) -> ProviderState {
        self.inner.control.lock().await.state
    }

    async fn init(&self) -> Result<()> {
        info!("Provider {}: initializing", self.name());
        let persistence = self.inner.persistence.as_ref();
        let last_id: Option<u64> = load_or(persistence, &keys::last_id(self.name()), None).await?;
        let approval_queue: Vec<ApprovalQueueItem> =
            load_or(persistence, &keys::approval_queue(self.name()), Vec::new()).await?;

        let mut state = self.inner.poll.lock().await;
        state.last_id = last_id;
        state.approval_queue = approval_queue;
        Ok(())
    }

    async fn start(&self) {
        let mut control = self.inner.control.lock().await;
        if control.state == ProviderState::Running {
            warn!("Provider {}: tried to start provider that was already running", self.name());
            return;
        }
        info!("Provider {}: starting", self.name());

        let (stop_tx, stop_rx) = watch::channel(false);
        // The first tick fires immediately, giving the initial poll
        self.inner.spawn_loop(self.inner.options.poll_period(), stop_rx.clone(), |inner| async move {
            inner.poll_at(Utc::now()).await
        });
        if self.inner.options.approved_only {
            self.inner.spawn_loop(self.inner.options.sweep_period(), stop_rx, |inner| async move {
                inner.sweep_at(Utc::now()).await
            });
        }

        control.stop_tx = Some(stop_tx);
        control.state = ProviderState::Running;
    }

    async fn stop(&self) {
        let mut control = self.inner.control.lock().await;
        if control.state == ProviderState::Idle {
            warn!("Provider {}: tried to stop provider that was already stopped", self.name());
            return;
        }
        info!("Provider {}: stopping", self.name());
        if let Some(stop_tx) = control.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        control.state = ProviderState::Idle;
    }

    async fn set_handler(&self, handler: Option<Arc<dyn PacketHandler>>) {
        *self.inner.handler.write().await = handler;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Silent {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl PostSource for Silent {
        fn base_url(&self) -> &str {
            "https://booru.test"
        }

        async fn most_recent(&self, _tags: &[String], _after: Option<u64>) -> Result<Option<serde_json::Value>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn posts_with_ids(&self, _ids: &[u64]) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    fn provider(options: DanbooruOptions) -> Result<DanbooruProvider> {
        DanbooruProvider::new(options, Arc::new(Silent::default()), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn rejects_intervals_below_minimum() {
        let options = DanbooruOptions::new("feed", vec![]).with_interval_ms(1_000);
        assert!(matches!(provider(options), Err(RelayError::InvalidArguments { .. })));
    }

    #[test]
    fn sweep_period_is_one_and_a_half_intervals_by_default() {
        let options = DanbooruOptions::new("feed", vec![]);
        assert_eq!(options.sweep_period(), Duration::from_millis(180_000));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: DanbooruOptions =
            serde_json::from_value(serde_json::json!({ "name": "feed", "tags": ["a"] })).unwrap();
        assert_eq!(options, DanbooruOptions::new("feed", vec!["a".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let provider = provider(DanbooruOptions::new("feed", vec![]).with_approved_only(true)).unwrap();
        assert_eq!(provider.state().await, ProviderState::Idle);

        provider.stop().await;
        assert_eq!(provider.state().await, ProviderState::Idle);

        provider.start().await;
        provider.start().await;
        assert_eq!(provider.state().await, ProviderState::Running);

        provider.stop().await;
        provider.stop().await;
        assert_eq!(provider.state().await, ProviderState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_runs_no_cycle() {
        let source = Arc::new(Silent::default());
        let provider = DanbooruProvider::new(
            DanbooruOptions::new("feed", vec![]),
            Arc::clone(&source) as Arc<dyn PostSource>,
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        // Both the first tick and the stop signal are ready when the loop first runs
        provider.start().await;
        provider.stop().await;
        tokio::time::sleep(Duration::from_millis(600_000)).await;

        assert_eq!(source.polls.load(Ordering::SeqCst), 0);
    }
}
