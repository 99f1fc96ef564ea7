//! # Background Prefetch Pipeline
//!
//! Warms the cache from a page-supplied manifest. Non-media assets go to the
//! `background` partition while the priority media set (the preferred track
//! plus the first few manifest tracks) goes to `media`. The rest of the
//! media follows once every priority entry has been handed to a worker.
//!
//! A run belongs to a [`JobToken`]. As soon as a newer run begins, workers
//! stop picking up entries and in-flight fetches are dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::cache::{CacheProvider, CacheStorage};
use crate::config::WorkerConfig;
use crate::diagnostics::Diagnostics;
use crate::job::JobToken;
use crate::manifest::AssetManifest;
use crate::messages::ClientMessage;
use crate::retry::AssetCacher;

/// Outcome of one prefetch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Entries present in their partition when the run ended
    pub cached: usize,
    /// Entries that exhausted their retries
    pub failed: usize,
    /// Entries never attempted or abandoned because the run was superseded
    pub skipped: usize,
    /// A newer run took over before this one finished
    pub superseded: bool,
}

#[derive(Default)]
struct Counters {
    cached: AtomicUsize,
    failed: AtomicUsize,
}

/// A shared queue drained by a fixed number of cooperative workers
struct Pool<'a> {
    name: &'static str,
    partition: Arc<dyn CacheProvider>,
    queue: Mutex<VecDeque<String>>,
    concurrency: usize,
    /// Opened once the queue has been fully handed out
    drained: Option<&'a watch::Sender<bool>>,
}

#[derive(Clone)]
pub struct PrefetchPipeline {
    config: Arc<WorkerConfig>,
    storage: CacheStorage,
    cacher: AssetCacher,
    diagnostics: Diagnostics,
    events: broadcast::Sender<ClientMessage>,
}

impl PrefetchPipeline {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: CacheStorage,
        cacher: AssetCacher,
        diagnostics: Diagnostics,
        events: broadcast::Sender<ClientMessage>,
    ) -> Self {
        Self {
            config,
            storage,
            cacher,
            diagnostics,
            events,
        }
    }

    pub async fn run(
        &self,
        manifest: &AssetManifest,
        preferred: Option<&str>,
        token: &JobToken,
    ) -> PrefetchReport {
        if manifest.is_empty() {
            self.diagnostics.info(
                format!(
                    "prefetch manifest is empty ({} entries rejected), nothing to cache",
                    manifest.rejected().len()
                ),
                None,
            );
            return PrefetchReport::default();
        }

        let (media, non_media) = manifest.partition(&self.config);
        let priority = AssetManifest::priority_set(
            &media,
            preferred,
            self.config.priority_media_count,
            &self.config.origin,
        );
        let remainder: Vec<String> = media
            .into_iter()
            .filter(|entry| !priority.contains(entry))
            .collect();
        let total = non_media.len() + priority.len() + remainder.len();

        let partitions = self.config.partitions();
        let (background, media_partition) = match (
            self.storage.open(&partitions.background),
            self.storage.open(&partitions.media),
        ) {
            (Ok(background), Ok(media)) => (background, media),
            (Err(e), _) | (_, Err(e)) => {
                self.diagnostics
                    .warn(format!("cannot open prefetch partitions: {e}"), None);
                self.broadcast_complete();
                return PrefetchReport {
                    failed: total,
                    ..Default::default()
                };
            }
        };

        self.diagnostics.debug(
            format!(
                "prefetch run {}: {} background, {} priority, {} remainder",
                token.generation(),
                non_media.len(),
                priority.len(),
                remainder.len()
            ),
            None,
        );

        let concurrency = &self.config.concurrency;
        let (gate_tx, mut gate_rx) = watch::channel(false);
        let counters = Counters::default();

        let background_pool = Pool::new(
            "background",
            background,
            non_media,
            concurrency.background,
            None,
        );
        let priority_pool = Pool::new(
            "priority",
            Arc::clone(&media_partition),
            priority,
            concurrency.priority,
            Some(&gate_tx),
        );
        let remainder_pool = Pool::new(
            "remainder",
            media_partition,
            remainder,
            concurrency.remainder,
            None,
        );

        tokio::join!(
            self.drain(&background_pool, token, &counters),
            async {
                self.drain(&priority_pool, token, &counters).await;
                // Covers an empty priority set and a cancelled run
                gate_tx.send_replace(true);
            },
            async {
                // Only fails once the sender is gone, and then the gate is moot
                let _ = gate_rx.wait_for(|open| *open).await;
                self.drain(&remainder_pool, token, &counters).await;
            },
        );

        let cached = counters.cached.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let report = PrefetchReport {
            cached,
            failed,
            skipped: total.saturating_sub(cached + failed),
            superseded: !token.is_current(),
        };

        info!(
            generation = token.generation(),
            cached = report.cached,
            failed = report.failed,
            skipped = report.skipped,
            superseded = report.superseded,
            "Prefetch run finished"
        );
        if report.superseded {
            self.diagnostics
                .debug(format!("prefetch run {} superseded", token.generation()), None);
        }

        self.broadcast_complete();
        report
    }

    async fn drain(&self, pool: &Pool<'_>, token: &JobToken, counters: &Counters) {
        let workers = (0..pool.concurrency.max(1)).map(|_| async {
            while token.is_current() {
                let Some(url) = pool.next() else {
                    break;
                };

                let ok = self
                    .cacher
                    .cache_with_retry(
                        pool.partition.as_ref(),
                        &url,
                        self.config.retry.max_retries,
                        Some(token.cancellation()),
                    )
                    .await;

                if ok {
                    counters.cached.fetch_add(1, Ordering::Relaxed);
                } else if token.is_current() {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        join_all(workers).await;

        debug!(pool = pool.name, generation = token.generation(), "Pool drained");
    }

    fn broadcast_complete(&self) {
        // No listening page is fine
        let _ = self.events.send(ClientMessage::BackgroundCacheComplete);
    }
}

impl<'a> Pool<'a> {
    fn new(
        name: &'static str,
        partition: Arc<dyn CacheProvider>,
        items: Vec<String>,
        concurrency: usize,
        drained: Option<&'a watch::Sender<bool>>,
    ) -> Self {
        Self {
            name,
            partition,
            queue: Mutex::new(items.into()),
            concurrency,
            drained,
        }
    }

    fn next(&self) -> Option<String> {
        let mut queue = self.queue.lock();
        let item = queue.pop_front();
        if queue.is_empty() {
            if let Some(gate) = self.drained {
                gate.send_replace(true);
            }
        }
        item
    }
}
