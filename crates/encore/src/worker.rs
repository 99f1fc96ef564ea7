//! # Asset Worker
//!
//! The lifecycle and messaging controller tying the cache set, the router
//! and the prefetch pipeline together. A host drives it through the same
//! events a browser delivers to a service worker: install, activate,
//! intercepted requests and page messages.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::config::WorkerConfig;
use crate::diagnostics::Diagnostics;
use crate::job::JobTracker;
use crate::kv::{KeyValueStore, PREFERRED_MEDIA_KEY};
use crate::manifest::{self, AssetManifest};
use crate::messages::{ClientMessage, WorkerMessage};
use crate::net::{Fetcher, Request};
use crate::pipeline::{PrefetchPipeline, PrefetchReport};
use crate::retry::AssetCacher;
use crate::router::{FetchOutcome, Router};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    /// Controls clients and routes their requests
    Activated,
    /// Replaced by a newer worker
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct AssetWorker {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    kv: Arc<dyn KeyValueStore>,
    cacher: AssetCacher,
    router: Router,
    pipeline: PrefetchPipeline,
    jobs: JobTracker,
    diagnostics: Diagnostics,
    events: broadcast::Sender<ClientMessage>,
    tasks: TaskTracker,
    state: RwLock<LifecycleState>,
    preferred: RwLock<Option<String>>,
    last_manifest: RwLock<Option<AssetManifest>>,
}

impl AssetWorker {
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: CacheStorage,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let diagnostics = Diagnostics::new(config.verbose, events.clone());
        let tasks = TaskTracker::new();

        let cacher = AssetCacher::new(
            fetcher,
            config.origin.clone(),
            config.retry.delay_base,
            diagnostics.clone(),
        );
        let router = Router::new(
            Arc::clone(&config),
            storage.clone(),
            cacher.clone(),
            tasks.clone(),
        );
        let pipeline = PrefetchPipeline::new(
            Arc::clone(&config),
            storage.clone(),
            cacher.clone(),
            diagnostics.clone(),
            events.clone(),
        );

        Self {
            config,
            storage,
            kv,
            cacher,
            router,
            pipeline,
            jobs: JobTracker::new(),
            diagnostics,
            events,
            tasks,
            state: RwLock::new(LifecycleState::Parsed),
            preferred: RwLock::new(None),
            last_manifest: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// The preferred media item in site-relative form
    pub fn preferred(&self) -> Option<String> {
        self.preferred.read().clone()
    }

    /// Receive every message broadcast to page contexts from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
        self.events.subscribe()
    }

    /// Seed the shell partition. Each shell URL is cached on its own so one
    /// failure never aborts the rest. Returns the number of entries cached.
    pub async fn install(&self) -> usize {
        self.set_state(LifecycleState::Installing);
        let partitions = self.config.partitions();

        let cached = match self.storage.open(&partitions.shell) {
            Ok(shell) => {
                let retries = self.config.retry.install_retries;
                let results = join_all(self.config.shell_urls.iter().map(|url| {
                    self.cacher
                        .cache_with_retry(shell.as_ref(), url, retries, None)
                }))
                .await;
                results.into_iter().filter(|ok| *ok).count()
            }
            Err(e) => {
                self.diagnostics
                    .warn(format!("cannot open shell partition: {e}"), None);
                0
            }
        };

        info!(
            partition = %partitions.shell,
            cached,
            total = self.config.shell_urls.len(),
            "Install finished"
        );
        // Never waits for older workers to go away
        self.set_state(LifecycleState::Installed);
        cached
    }

    /// Evict partitions from other versions, restore the preferred item and
    /// start routing requests. Returns the names of the deleted partitions.
    pub async fn activate(&self) -> Vec<String> {
        self.set_state(LifecycleState::Activating);
        let current = self.config.partitions();

        let mut deleted = Vec::new();
        for name in self.storage.keys() {
            if current.contains(&name) {
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => self
                    .diagnostics
                    .warn(format!("failed to delete partition {name}: {e}"), None),
            }
        }

        if let Some(stored) = self.kv.get(PREFERRED_MEDIA_KEY).await {
            match manifest::normalize(&stored, &self.config.origin) {
                Some(preferred) => {
                    self.diagnostics
                        .debug("restored preferred media", Some(preferred.as_str()));
                    *self.preferred.write() = Some(preferred.clone());
                    self.spawn_preferred_prefetch(preferred);
                }
                None => self
                    .diagnostics
                    .debug("ignoring unusable stored preferred media", Some(stored.as_str())),
            }
        }

        self.set_state(LifecycleState::Activated);
        info!(evicted = deleted.len(), "Worker activated");
        deleted
    }

    /// Answer an intercepted request. Until activation every request passes
    /// through.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if self.state() != LifecycleState::Activated {
            return FetchOutcome::Passthrough;
        }
        self.router.route(request).await
    }

    /// Decode and handle a page message. Malformed messages are reported
    /// and otherwise ignored.
    pub async fn handle_raw_message(&self, raw: &str) -> Option<PrefetchReport> {
        match WorkerMessage::from_json(raw) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                self.diagnostics
                    .warn(format!("ignoring malformed message: {e}"), None);
                None
            }
        }
    }

    /// Handle a page message. Returns the report of the prefetch run the
    /// message triggered, if any.
    pub async fn handle_message(&self, message: WorkerMessage) -> Option<PrefetchReport> {
        debug!(kind = message.kind(), "Handling message");

        match message {
            WorkerMessage::PrefetchManifest { assets } => {
                let manifest = AssetManifest::parse(&assets, &self.config.origin);
                // An empty manifest is reported once, by the pipeline
                if !manifest.is_empty() && !manifest.rejected().is_empty() {
                    self.diagnostics.debug(
                        format!(
                            "{} manifest entries rejected: {}",
                            manifest.rejected().len(),
                            manifest.rejected().join(", ")
                        ),
                        None,
                    );
                }
                *self.last_manifest.write() = Some(manifest.clone());

                let token = self.jobs.begin();
                let preferred = self.preferred();
                Some(
                    self.pipeline
                        .run(&manifest, preferred.as_deref(), &token)
                        .await,
                )
            }
            WorkerMessage::SetPreferredMedia { url } => self.set_preferred(&url).await,
            WorkerMessage::ClearPreferredMedia => {
                *self.preferred.write() = None;
                if !self.kv.delete(PREFERRED_MEDIA_KEY).await {
                    self.diagnostics
                        .warn("failed to clear stored preferred media", None);
                }
                None
            }
        }
    }

    async fn set_preferred(&self, url: &str) -> Option<PrefetchReport> {
        let Some(preferred) = manifest::normalize(url, &self.config.origin) else {
            self.diagnostics
                .warn("ignoring invalid preferred media", Some(url));
            return None;
        };

        *self.preferred.write() = Some(preferred.clone());
        if !self.kv.set(PREFERRED_MEDIA_KEY, &preferred).await {
            self.diagnostics.warn(
                "could not persist preferred media, keeping it in memory",
                Some(preferred.as_str()),
            );
        }

        // Preempt whatever is running; the new item goes first
        let token = self.jobs.begin();
        let media_name = self.config.partitions().media;
        match self.storage.open(&media_name) {
            Ok(media) => {
                self.cacher
                    .cache_with_retry(
                        media.as_ref(),
                        &preferred,
                        self.config.retry.preferred_retries,
                        Some(token.cancellation()),
                    )
                    .await;
            }
            Err(e) => self
                .diagnostics
                .warn(format!("cannot open media partition: {e}"), None),
        }

        if !token.is_current() {
            return None;
        }
        let manifest = self.last_manifest.read().clone()?;
        Some(
            self.pipeline
                .run(&manifest, Some(preferred.as_str()), &token)
                .await,
        )
    }

    /// Mark the worker as replaced and stop its background work
    pub fn supersede(&self) {
        self.set_state(LifecycleState::Redundant);
        self.jobs.cancel_current();
        info!("Worker superseded");
    }

    /// Wait for every fire-and-forget task spawned so far
    pub async fn flush_background(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn spawn_preferred_prefetch(&self, preferred: String) {
        let storage = self.storage.clone();
        let cacher = self.cacher.clone();
        let diagnostics = self.diagnostics.clone();
        let media_name = self.config.partitions().media;
        let retries = self.config.retry.preferred_retries;

        self.tasks.spawn(async move {
            match storage.open(&media_name) {
                Ok(media) => {
                    cacher
                        .cache_with_retry(media.as_ref(), &preferred, retries, None)
                        .await;
                }
                Err(e) => diagnostics.warn(format!("cannot open media partition: {e}"), None),
            }
        });
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        debug!(from = %previous, to = %state, "Lifecycle transition");
    }
}
