//! In-memory citation source and request gate for unit tests. The source
//! ignores the requested limit so callers' own truncation is exercised.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::apis::{CitationSource, RelatedWork, RequestGate, SourceError};

/// Admits every request at once and counts them.
#[derive(Default)]
pub struct RecordingGate {
    turns: AtomicUsize,
}

impl RecordingGate {
    pub fn turns(&self) -> usize {
        self.turns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestGate for RecordingGate {
    async fn wait_turn(&self) -> Result<(), SourceError> {
        self.turns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSource {
    name: String,
    references: HashMap<String, Vec<String>>,
    citations: HashMap<String, Vec<String>>,
    titles: HashMap<String, String>,
    flaky: Mutex<HashMap<String, u32>>,
    failing: HashSet<String>,
    rejecting: HashSet<String>,
    stall: Option<Duration>,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::named("fake")
    }

    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn refs(mut self, doi: &str, targets: &[&str]) -> Self {
        self.references.insert(doi.to_string(), targets.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn cites(mut self, doi: &str, citers: &[&str]) -> Self {
        self.citations.insert(doi.to_string(), citers.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn title(mut self, id: &str, title: &str) -> Self {
        self.titles.insert(id.to_string(), title.to_string());
        self
    }

    /// Fail with a 429 the first `times` calls for `doi`.
    pub fn flaky(self, doi: &str, times: u32) -> Self {
        self.flaky.lock().unwrap().insert(doi.to_string(), times);
        self
    }

    /// Always fail with a 503 for `doi`.
    pub fn failing(mut self, doi: &str) -> Self {
        self.failing.insert(doi.to_string());
        self
    }

    /// Always fail with a permanent API error for `doi`.
    pub fn rejecting(mut self, doi: &str) -> Self {
        self.rejecting.insert(doi.to_string());
        self
    }

    /// Take `wait` to answer every call, ignoring cancellation like a real
    /// in-flight request.
    pub fn stall(mut self, wait: Duration) -> Self {
        self.stall = Some(wait);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// DOIs in the order they were requested.
    pub fn requested(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn answer(
        &self,
        doi: &str,
        table: &HashMap<String, Vec<String>>,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        gate.wait_turn().await?;
        if let Some(wait) = self.stall {
            tokio::time::sleep(wait).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(doi.to_string());
        if self.failing.contains(doi) {
            return Err(SourceError::Status(503));
        }
        if self.rejecting.contains(doi) {
            return Err(SourceError::Api("status 400: bad request".into()));
        }
        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(doi) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Status(429));
            }
        }
        Ok(table
            .get(doi)
            .map(|ids| {
                ids.iter()
                    .map(|id| RelatedWork { id: id.clone(), title: self.titles.get(id).cloned() })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CitationSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_references(
        &self,
        doi: &str,
        _limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        self.answer(doi, &self.references, gate).await
    }

    async fn get_citations(
        &self,
        doi: &str,
        _limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        self.answer(doi, &self.citations, gate).await
    }
}
