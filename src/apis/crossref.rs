use super::{read_json, CitationSource, RelatedWork, RequestGate, SourceError};
use crate::normalize::canonical_doi;
use async_trait::async_trait;
use serde::Deserialize;

const BASE_URL: &str = "https://api.crossref.org";

pub struct CrossRefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: Option<String>,
}

impl CrossRefClient {
    pub fn new(mailto: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(mailto, BASE_URL)
    }

    pub fn with_base_url(mailto: Option<String>, base_url: &str) -> Result<Self, SourceError> {
        let ua = match mailto {
            Some(ref m) => format!("research-orbits/0.1 (mailto:{})", m),
            None => "research-orbits/0.1".to_string(),
        };
        Ok(Self {
            client: reqwest::Client::builder().user_agent(ua).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            mailto,
        })
    }
}

#[derive(Deserialize)]
struct CRResponse {
    message: CRMessage,
}

#[derive(Deserialize)]
struct CRMessage {
    reference: Option<Vec<CRReference>>,
}

#[derive(Deserialize)]
struct CRReference {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "article-title")]
    article_title: Option<String>,
}

fn references_to_related(refs: &[CRReference], limit: usize) -> Vec<RelatedWork> {
    refs.iter()
        .filter_map(|r| {
            let id = canonical_doi(r.doi.as_deref()?);
            if id.is_empty() {
                return None;
            }
            Some(RelatedWork {
                id,
                title: r.article_title.clone().filter(|t| !t.trim().is_empty()),
            })
        })
        .take(limit)
        .collect()
}

#[async_trait]
impl CitationSource for CrossRefClient {
    fn name(&self) -> &str { "crossref" }

    async fn get_references(
        &self,
        doi: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        // Synthetic ids from other sources have no CrossRef record.
        if limit == 0 || !doi.starts_with("10.") {
            return Ok(Vec::new());
        }
        let mut req = self.client.get(&format!("{}/works/{}", self.base_url, doi));
        if let Some(ref m) = self.mailto {
            req = req.query(&[("mailto", m.as_str())]);
        }
        gate.wait_turn().await?;
        let resp = req.send().await?;
        let Some(cr) = read_json::<CRResponse>(resp).await? else {
            return Ok(Vec::new());
        };
        Ok(references_to_related(&cr.message.reference.unwrap_or_default(), limit))
    }

    async fn get_citations(
        &self,
        _doi: &str,
        _limit: usize,
        _gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        Ok(vec![]) // CrossRef has no public cited-by listing
    }
}
