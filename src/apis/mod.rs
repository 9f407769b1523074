pub mod crossref;
pub mod openalex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A work on the other end of a citation, as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedWork {
    /// Lowercased DOI, or `openalex:W…` when the provider has no DOI for it.
    pub id: String,
    pub title: Option<String>,
}

/// Which side of the citation relation to ask a provider about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Works the given DOI cites.
    References,
    /// Works that cite the given DOI.
    Citations,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::References => f.write_str("references"),
            Direction::Citations => f.write_str("citations"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider returned status {0}")]
    Status(u16),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether another attempt might succeed (rate limiting, server errors, network).
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => !e.is_decode() && !e.is_builder(),
            SourceError::Status(code) => *code == 429 || (500..600).contains(code),
            SourceError::Parse(_) | SourceError::Api(_) | SourceError::Cancelled => false,
        }
    }
}

/// Admission for outbound requests. Sources await their turn before every
/// HTTP request they send, so one logical lookup made of several requests
/// is paced request by request.
#[async_trait]
pub trait RequestGate: Send + Sync {
    async fn wait_turn(&self) -> Result<(), SourceError>;
}

#[async_trait]
pub trait CitationSource: Send + Sync {
    fn name(&self) -> &str;
    async fn get_references(
        &self,
        doi: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError>;
    async fn get_citations(
        &self,
        doi: &str,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError>;

    async fn related(
        &self,
        doi: &str,
        direction: Direction,
        limit: usize,
        gate: &dyn RequestGate,
    ) -> Result<Vec<RelatedWork>, SourceError> {
        match direction {
            Direction::References => self.get_references(doi, limit, gate).await,
            Direction::Citations => self.get_citations(doi, limit, gate).await,
        }
    }
}

/// Decode a provider response. 404 is "no record" (`None`).
pub(crate) async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<Option<T>, SourceError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| SourceError::Parse(e.to_string()))
}

/// 429 and 5xx stay retryable; any other failure status is a permanent API error.
fn status_error(status: reqwest::StatusCode, body: &str) -> SourceError {
    let code = status.as_u16();
    if code == 429 || status.is_server_error() {
        return SourceError::Status(code);
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect());
    SourceError::Api(format!("status {}: {}", code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_transient_classification() {
        assert!(SourceError::Status(429).is_transient());
        assert!(SourceError::Status(503).is_transient());
        assert!(!SourceError::Status(400).is_transient());
        assert!(!SourceError::Parse("bad".into()).is_transient());
        assert!(!SourceError::Api("bad".into()).is_transient());
        assert!(!SourceError::Cancelled.is_transient());
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), SourceError::Status(429)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, "oops"), SourceError::Status(502)));
        match status_error(StatusCode::BAD_REQUEST, r#"{"error": "Invalid query", "message": "bad filter"}"#) {
            SourceError::Api(msg) => assert_eq!(msg, "status 400: bad filter"),
            other => panic!("expected Api error, got {:?}", other),
        }
        match status_error(StatusCode::FORBIDDEN, "  denied \n") {
            SourceError::Api(msg) => assert_eq!(msg, "status 403: denied"),
            other => panic!("expected Api error, got {:?}", other),
        }
    }
}
