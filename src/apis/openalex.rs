use std::collections::HashMap;
use std::sync::Mutex;

use super::{read_json, CitationSource, RelatedWork, RequestGate, SourceError};
use crate::normalize::canonical_doi;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.openalex.org";
const SELECT: &str = "id,doi,title";
const MAX_PER_PAGE: usize = 200;
const MAX_CACHED_IDS: usize = 10_000;

pub struct OpenAlexClient {
    client: reqwest::Client,
    base_url: String,
    /// DOI → OpenAlex work id (`None` when OpenAlex has no record).
    work_ids: Mutex<HashMap<String, Option<String>>>,
}

impl OpenAlexClient {
    pub fn new(email: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(email, BASE_URL)
    }

    pub fn with_base_url(email: Option<String>, base_url: &str) -> Result<Self, SourceError> {
        let ua = match email {
            Some(ref e) => format!("research-orbits/0.1 (mailto:{})", e),
            None => "research-orbits/0.1".to_string(),
        };
        Ok(Self {
            client: reqwest::Client::builder().user_agent(ua).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            work_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a DOI (or a synthetic `openalex:W…` id) to its OpenAlex work id.
    /// `None` when OpenAlex has no record. Lookups are remembered, so the
    /// second direction and retried listings skip the round trip.
    async fn resolve_work_id(
        &self,
        doi: &str,
        gate: &dyn RequestGate,
    ) -> Result<Option<String>, SourceError> {
        if let Some(work_id) = doi.strip_prefix("openalex:") {
            return Ok(Some(work_id.to_string()));
        }
        if let Some(known) = self.cached_work_id(doi) {
            return Ok(known);
        }
        gate.wait_turn().await?;
        let resp = self.client
            .get(&format!("{}/works/doi:{}", self.base_url, doi))
            .query(&[("select", SELECT)])
            .send().await?;
        let work: Option<OAWork> = read_json(resp).await?;
        let work_id = work
            .and_then(|w| w.id)
            .map(|id| short_id(&id).to_string())
            .filter(|id| !id.is_empty());
        self.remember(doi, work_id.clone());
        Ok(work_id)
    }

    fn cached_work_id(&self, doi: &str) -> Option<Option<String>> {
        self.work_ids.lock().ok()?.get(doi).cloned()
    }

    fn remember(&self, doi: &str, work_id: Option<String>) {
        if let Ok(mut ids) = self.work_ids.lock() {
            if ids.len() >= MAX_CACHED_IDS {
                ids.clear();
            }
            ids.insert(doi.to_string(), work_id);
        }
    }

    async fn list_filtered(
        &self,
        filter: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        let per_page = limit.clamp(1, MAX_PER_PAGE).to_string();
        gate.wait_turn().await?;
        let resp = self.client
            .get(&format!("{}/works", self.base_url))
            .query(&[
                ("filter", filter),
                ("per_page", per_page.as_str()),
                ("select", SELECT),
            ])
            .send().await?;
        let body: Option<OAResponse> = read_json(resp).await?;
        Ok(body.map(|b| works_to_related(&b.results)).unwrap_or_default())
    }

    async fn relation(
        &self,
        doi: &str,
        filter_key: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(work_id) = self.resolve_work_id(doi, gate).await? else {
            tracing::debug!("OpenAlex has no work for {}", doi);
            return Ok(Vec::new());
        };
        self.list_filtered(&format!("{}:{}", filter_key, work_id), limit, gate).await
    }
}

#[derive(Deserialize)]
struct OAResponse {
    results: Vec<OAWork>,
}

#[derive(Deserialize)]
struct OAWork {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
}

/// `https://openalex.org/W123` → `W123`.
fn short_id(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

fn works_to_related(works: &[OAWork]) -> Vec<RelatedWork> {
    works.iter()
        .filter_map(|w| {
            let doi = w.doi.as_deref().map(canonical_doi).filter(|d| !d.is_empty());
            let id = match (doi, w.id.as_deref().map(short_id)) {
                (Some(doi), _) => doi,
                (None, Some(oa)) if !oa.is_empty() => format!("openalex:{}", oa),
                _ => return None,
            };
            Some(RelatedWork {
                id,
                title: w.title.clone().filter(|t| !t.trim().is_empty()),
            })
        })
        .collect()
}

#[async_trait]
impl CitationSource for OpenAlexClient {
    fn name(&self) -> &str { "openalex" }

    async fn get_references(
        &self,
        doi: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        // `cited_by:W` lists the works W cites.
        self.relation(doi, "cited_by", limit, gate).await
    }

    async fn get_citations(
        &self,
        doi: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        self.relation(doi, "cites", limit, gate).await
    }
}
