use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::apis::{self, CitationSource};
use crate::fetcher::RetryPolicy;
use crate::graph::GraphOptions;

const KNOWN_SOURCES: &[&str] = &["openalex", "crossref"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown citation source: {0}")]
    UnknownSource(String),
    #[error("No citation sources enabled")]
    NoSources,
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
    #[error("Invalid endpoint for {source_name}: {url}")]
    InvalidEndpoint { source_name: String, url: String },
    #[error("Failed to build HTTP client for {source_name}: {message}")]
    Client { source_name: String, message: String },
    #[error("Invalid graph option: {0}")]
    InvalidOption(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Citation sources in the order they are consulted.
    pub source_names: Vec<String>,
    pub openalex_email: Option<String>,
    pub crossref_mailto: Option<String>,
    pub openalex_base_url: Option<String>,
    pub crossref_base_url: Option<String>,
    pub retry: RetryPolicy,
    /// Keep built graphs on disk under `data_dir`; otherwise only in memory.
    pub persist_cache: bool,
    /// Defaults for options a graph request leaves unset.
    pub graph_defaults: GraphOptions,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = var("ORBITS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_or_default().join(".research-orbits"));

        let source_names = var("ORBITS_SOURCES")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| KNOWN_SOURCES.iter().map(|s| s.to_string()).collect());

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_var(&var, "ORBITS_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_backoff: parse_var(&var, "ORBITS_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            max_backoff: defaults.max_backoff,
        };

        let base = GraphOptions::default();
        let graph_defaults = GraphOptions {
            max_depth: parse_var(&var, "ORBITS_MAX_DEPTH")?.unwrap_or(base.max_depth),
            max_refs_per_node: parse_var(&var, "ORBITS_MAX_REFS_PER_NODE")?.unwrap_or(base.max_refs_per_node),
            max_total_nodes: parse_var(&var, "ORBITS_MAX_TOTAL_NODES")?.or(base.max_total_nodes),
            include_incoming: parse_var(&var, "ORBITS_INCLUDE_INCOMING")?.unwrap_or(base.include_incoming),
            delay_ms: parse_var(&var, "ORBITS_DELAY_MS")?.unwrap_or(base.delay_ms),
        };
        graph_defaults.validate()?;

        Ok(Self {
            data_dir,
            source_names,
            openalex_email: var("OPENALEX_EMAIL"),
            crossref_mailto: var("CROSSREF_MAILTO"),
            openalex_base_url: var("OPENALEX_BASE_URL"),
            crossref_base_url: var("CROSSREF_BASE_URL"),
            retry,
            persist_cache: parse_var(&var, "ORBITS_PERSIST_CACHE")?.unwrap_or(true),
            graph_defaults,
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("graphs")
    }

    /// Build the enabled citation sources in configured order.
    ///
    /// Fails before any network activity if a source is unknown or an
    /// endpoint override is not a valid URL.
    pub fn build_sources(&self) -> Result<Vec<Arc<dyn CitationSource>>, ConfigError> {
        if self.source_names.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut sources: Vec<Arc<dyn CitationSource>> = Vec::new();
        for name in &self.source_names {
            let source: Arc<dyn CitationSource> = match name.as_str() {
                "openalex" => {
                    let base = endpoint(name, self.openalex_base_url.as_deref())?;
                    let client = match base {
                        Some(url) => apis::openalex::OpenAlexClient::with_base_url(self.openalex_email.clone(), url),
                        None => apis::openalex::OpenAlexClient::new(self.openalex_email.clone()),
                    };
                    Arc::new(client.map_err(|e| client_error(name, e))?)
                }
                "crossref" => {
                    let base = endpoint(name, self.crossref_base_url.as_deref())?;
                    let client = match base {
                        Some(url) => apis::crossref::CrossRefClient::with_base_url(self.crossref_mailto.clone(), url),
                        None => apis::crossref::CrossRefClient::new(self.crossref_mailto.clone()),
                    };
                    Arc::new(client.map_err(|e| client_error(name, e))?)
                }
                other => return Err(ConfigError::UnknownSource(other.to_string())),
            };
            sources.push(source);
        }
        Ok(sources)
    }

    /// Return a list of source status descriptions.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let enabled = |name: &str| self.source_names.iter().any(|s| s == name);
        let mut statuses = vec![
            SourceStatus {
                name: "openalex".into(),
                enabled: enabled("openalex"),
                note: if self.openalex_email.is_some() { "Polite pool email set".into() } else { "No email (limited rate)".into() },
            },
            SourceStatus {
                name: "crossref".into(),
                enabled: enabled("crossref"),
                note: if self.crossref_mailto.is_some() {
                    "Polite pool mailto set; references only".into()
                } else {
                    "No mailto (public pool); references only".into()
                },
            },
        ];
        for s in &mut statuses {
            if !s.enabled {
                s.note = "Disabled by ORBITS_SOURCES".into();
            }
        }
        statuses
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub note: String,
}

fn parse_var<T, V>(var: &V, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var: name.to_string(), value }),
    }
}

fn endpoint<'a>(source: &str, url: Option<&'a str>) -> Result<Option<&'a str>, ConfigError> {
    match url {
        None => Ok(None),
        Some(u) => match reqwest::Url::parse(u) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(Some(u)),
            _ => Err(ConfigError::InvalidEndpoint { source_name: source.to_string(), url: u.to_string() }),
        },
    }
}

fn client_error(source: &str, e: apis::SourceError) -> ConfigError {
    ConfigError::Client { source_name: source.to_string(), message: e.to_string() }
}

fn home_or_default() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
