use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::apis::{Direction, RelatedWork};
use crate::fetcher::RateLimitedFetcher;
use crate::graph::cache::{signature, CacheRecord, CacheStore};
use crate::graph::{assembler, expander, BuildError, Graph, GraphOptions, ProgressObserver};
use crate::normalize::{canonical_doi, normalize_dois};

pub const DEFAULT_CONTEXT: &str = "default";

/// One graph request from a consumer context.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context: String,
    pub seeds: Vec<String>,
    pub titles: HashMap<String, String>,
    pub options: GraphOptions,
    /// Skip the cache and overwrite it with a fresh build.
    pub force: bool,
}

/// Builds citation graphs through a shared fetcher and cache, allowing one
/// in-flight build per consumer context.
pub struct GraphService {
    fetcher: Arc<RateLimitedFetcher>,
    cache: Arc<dyn CacheStore>,
    active: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_build: AtomicU64,
}

impl GraphService {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            fetcher,
            cache,
            active: Mutex::new(HashMap::new()),
            next_build: AtomicU64::new(0),
        }
    }

    /// Return the cached graph for this seed set, or build and cache a new one.
    ///
    /// Every request, including cache hits and rejected ones, supersedes the
    /// build in progress for its context.
    pub async fn build_or_load(
        &self,
        request: BuildRequest,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<Graph, BuildError> {
        let (build_id, cancel) = self.begin(&request.context);
        let result = self.load_or_build(&request, build_id, observer, &cancel).await;
        self.finish(&request.context, build_id);
        result
    }

    async fn load_or_build(
        &self,
        request: &BuildRequest,
        build_id: u64,
        observer: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<Graph, BuildError> {
        request.options.validate()?;

        let seeds = normalize_dois(&request.seeds);
        if seeds.is_empty() {
            tracing::info!("No seeds for context {}, returning empty graph", request.context);
            return Ok(Graph::default());
        }
        let sig = signature(&seeds);
        let context = request.context.as_str();

        if request.force {
            if let Err(e) = self.cache.discard(context) {
                tracing::warn!("Failed to discard cached graph for {}: {}", context, e);
            }
        } else {
            match self.cache.load(context) {
                Ok(Some(record)) if record.signature == sig => {
                    tracing::info!(
                        "Cache hit for {} ({} nodes, built {})",
                        context, record.graph.nodes.len(), record.built_at
                    );
                    return Ok(record.graph);
                }
                Ok(Some(_)) => tracing::debug!("Cached graph for {} is for another seed set", context),
                Ok(None) => {}
                Err(e) => tracing::warn!("Cache unavailable for {}: {}", context, e),
            }
        }

        let titles: HashMap<String, String> = request.titles.iter()
            .map(|(doi, title)| (canonical_doi(doi), title.clone()))
            .filter(|(doi, title)| !doi.is_empty() && !title.trim().is_empty())
            .collect();

        let graph = self.build(&seeds, &titles, &request.options, observer, cancel).await?;
        let record = CacheRecord { signature: sig, built_at: Utc::now(), graph };
        self.publish(context, build_id, cancel, &record)?;
        tracing::info!(
            "Built graph for {}: {} nodes, {} links",
            context, record.graph.nodes.len(), record.graph.links.len()
        );
        Ok(record.graph)
    }

    /// Build without touching the cache. Seeds must already be normalized.
    pub async fn build(
        &self,
        seeds: &[String],
        titles: &HashMap<String, String>,
        options: &GraphOptions,
        observer: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<Graph, BuildError> {
        let state = expander::expand(&self.fetcher, seeds, titles, options, observer, cancel).await?;
        Ok(assembler::assemble(state))
    }

    /// Cancel the in-flight build for `context`. Returns whether one was running.
    pub fn cancel(&self, context: &str) -> bool {
        match self.active.lock() {
            Ok(mut active) => match active.remove(context) {
                Some((_, token)) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Single paced, retried lookup outside of any build.
    pub async fn related(
        &self,
        doi: &str,
        direction: Direction,
        limit: usize,
        delay: Duration,
    ) -> Vec<RelatedWork> {
        let doi = canonical_doi(doi);
        if doi.is_empty() {
            return Vec::new();
        }
        self.fetcher
            .fetch(&doi, direction, limit, delay, &CancellationToken::new())
            .await
            .unwrap_or_default()
    }

    /// Register a new build for `context`, cancelling whichever one it supersedes.
    fn begin(&self, context: &str) -> (u64, CancellationToken) {
        let id = self.next_build.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        match self.active.lock() {
            Ok(mut active) => {
                if let Some((prev, old)) = active.insert(context.to_string(), (id, token.clone())) {
                    tracing::info!("Build {} for {} superseded by build {}", prev, context, id);
                    old.cancel();
                }
            }
            Err(_) => tracing::warn!("Build registry poisoned; build {} cannot be superseded", id),
        }
        (id, token)
    }

    /// Store `record` unless this build was cancelled or superseded. The
    /// registry lock is held across the check and the write, so a newer
    /// request for the context cannot slip in between.
    fn publish(
        &self,
        context: &str,
        id: u64,
        cancel: &CancellationToken,
        record: &CacheRecord,
    ) -> Result<(), BuildError> {
        let active = self.active.lock();
        let current = match &active {
            Ok(active) => active.get(context).is_some_and(|(current, _)| *current == id),
            Err(_) => true,
        };
        if cancel.is_cancelled() || !current {
            tracing::info!("Build {} for {} was cancelled before publishing", id, context);
            return Err(BuildError::Cancelled);
        }
        if let Err(e) = self.cache.store(context, record) {
            tracing::warn!("Failed to cache graph for {}: {}", context, e);
        }
        Ok(())
    }

    fn finish(&self, context: &str, id: u64) {
        if let Ok(mut active) = self.active.lock() {
            if active.get(context).is_some_and(|(current, _)| *current == id) {
                active.remove(context);
            }
        }
    }
}
