//! # Encore
//!
//! An offline asset cache engine for a single static site. It plays the role
//! a service worker plays in the browser: it seeds and versions a set of
//! named cache partitions, serves media requests cache-first, and prefetches
//! the site's assets in the background with the currently preferred track
//! fetched ahead of everything else.
//!
//! ## Features
//!
//! - Four versioned cache partitions (shell, runtime, background, media)
//!   backed by memory or disk
//! - A single retrying fetch-and-cache primitive enforcing status, origin and
//!   scheme checks
//! - Media-first request routing with a synthesized 503 for unreachable,
//!   uncached media
//! - A prioritized, cancellable background prefetch pipeline
//! - A durable preferred-media pointer stored in SQLite

pub mod builder;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod job;
pub mod kv;
pub mod manifest;
pub mod messages;
pub mod net;
pub mod pipeline;
pub mod retry;
pub mod router;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_util;

pub use builder::WorkerConfigBuilder;
pub use cache::{CacheKey, CacheMetadata, CacheProvider, CacheStorage, StorageBackend};
pub use config::{HttpConfig, PartitionSet, PrefetchConcurrency, RetryConfig, WorkerConfig};
pub use diagnostics::{DiagnosticLevel, Diagnostics};
pub use error::WorkerError;
pub use job::{JobToken, JobTracker};
pub use kv::{KeyValueStore, MemoryStore, PREFERRED_MEDIA_KEY, SqliteStore};
pub use manifest::AssetManifest;
pub use messages::{ClientMessage, WorkerMessage};
pub use net::{Fetcher, HttpFetcher, Request, Response, SiteOrigin, create_client};
pub use pipeline::{PrefetchPipeline, PrefetchReport};
pub use retry::{AssetCacher, StatusPolicy};
pub use router::{FetchOutcome, Router};
pub use worker::{AssetWorker, LifecycleState};
