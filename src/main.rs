use std::collections::HashMap;
use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod apis;
mod config;
mod fetcher;
mod graph;
mod normalize;
mod service;
#[cfg(test)]
mod testing;

use apis::Direction;
use config::Config;
use fetcher::RateLimitedFetcher;
use graph::cache::{CacheStore, FileCacheStore, MemoryCacheStore};
use graph::{BuildError, GraphOptions};
use service::{BuildRequest, GraphService, DEFAULT_CONTEXT};

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct RelationParams {
    #[schemars(description = "DOI to look up (bare, doi: prefixed, or https://doi.org/ URL)")]
    doi: String,
    #[schemars(description = "Maximum related works to return (default 25, max 200)")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BuildGraphParams {
    #[schemars(description = "Seed DOIs to start the citation graph from")]
    seeds: Vec<String>,
    #[schemars(description = "Known titles keyed by DOI, used as node labels")]
    titles: Option<HashMap<String, String>>,
    #[schemars(description = "Traversal depth from the seeds (0 = seeds only)")]
    max_depth: Option<u32>,
    #[schemars(description = "Maximum related works kept per expanded node")]
    max_refs_per_node: Option<usize>,
    #[schemars(description = "Stop adding nodes once this many are discovered")]
    max_total_nodes: Option<usize>,
    #[schemars(description = "Also follow works that cite each node")]
    include_incoming: Option<bool>,
    #[schemars(description = "Minimum milliseconds between provider requests")]
    delay_ms: Option<u64>,
    #[schemars(description = "Ignore and overwrite the cached graph")]
    force: Option<bool>,
    #[schemars(description = "Consumer context owning the cache slot (default \"default\")")]
    context: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CancelBuildParams {
    #[schemars(description = "Consumer context whose in-flight build should stop (default \"default\")")]
    context: Option<String>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CitationGraphServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    service: Arc<GraphService>,
}

#[tool_router]
impl CitationGraphServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env()?;
        let sources = config.build_sources()?;

        let fetcher = RateLimitedFetcher::new(sources, config.retry.clone());
        tracing::info!(
            "Initialized citation sources [{}], data_dir={}",
            fetcher.source_names().join(", "),
            config.data_dir.display()
        );

        let cache: Arc<dyn CacheStore> = if config.persist_cache {
            Arc::new(FileCacheStore::new(&config.cache_dir()))
        } else {
            tracing::info!("Graph cache is in-memory only");
            Arc::new(MemoryCacheStore::default())
        };
        let service = GraphService::new(Arc::new(fetcher), cache);

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            service: Arc::new(service),
        })
    }

    #[tool(description = "List configured citation sources and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        let statuses = self.config.source_status();
        let json = serde_json::to_string_pretty(&statuses)
            .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Get works referenced by a DOI")]
    async fn get_references(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relation(params, Direction::References).await
    }

    #[tool(description = "Get works that cite a DOI")]
    async fn get_citations(
        &self,
        Parameters(params): Parameters<RelationParams>,
    ) -> Result<CallToolResult, McpError> {
        self.relation(params, Direction::Citations).await
    }

    #[tool(description = "Build a citation graph from seed DOIs by breadth-first expansion over citation sources. Returns {nodes, links}; cached per context and seed set unless force is set.")]
    async fn build_citation_graph(
        &self,
        Parameters(params): Parameters<BuildGraphParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = self.build_request(params);
        let context = request.context.clone();
        let observer = |index: usize, total: usize, id: &str| {
            tracing::debug!("[{}] expanding {}/{}: {}", context, index + 1, total, id);
        };

        let graph = self.service
            .build_or_load(request, Some(&observer))
            .await
            .map_err(|e| match e {
                BuildError::Config(e) => McpError::invalid_params(e.to_string(), None),
                BuildError::Cancelled => McpError::internal_error(
                    format!("Build for context {} was cancelled", context),
                    None,
                ),
            })?;

        let json = graph
            .to_json()
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Cancel the in-flight citation graph build for a context")]
    async fn cancel_build(
        &self,
        Parameters(params): Parameters<CancelBuildParams>,
    ) -> Result<CallToolResult, McpError> {
        let context = params.context.unwrap_or_else(|| DEFAULT_CONTEXT.to_string());
        let msg = if self.service.cancel(&context) {
            format!("Cancelled build for context: {}", context)
        } else {
            format!("No build in progress for context: {}", context)
        };
        Ok(CallToolResult::success(vec![Content::text(msg)]))
    }
}

impl CitationGraphServer {
    async fn relation(
        &self,
        params: RelationParams,
        direction: Direction,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(25).clamp(1, 200);
        let works = self.service
            .related(&params.doi, direction, limit, self.config.graph_defaults.delay())
            .await;
        let json = serde_json::to_string_pretty(&works)
            .map_err(|e| McpError::internal_error(format!("{}", e), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Fill unset request options from the configured defaults.
    fn build_request(&self, params: BuildGraphParams) -> BuildRequest {
        let defaults = &self.config.graph_defaults;
        BuildRequest {
            context: params.context
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTEXT.to_string()),
            seeds: params.seeds,
            titles: params.titles.unwrap_or_default(),
            options: GraphOptions {
                max_depth: params.max_depth.unwrap_or(defaults.max_depth),
                max_refs_per_node: params.max_refs_per_node.unwrap_or(defaults.max_refs_per_node),
                max_total_nodes: params.max_total_nodes.or(defaults.max_total_nodes),
                include_incoming: params.include_incoming.unwrap_or(defaults.include_incoming),
                delay_ms: params.delay_ms.unwrap_or(defaults.delay_ms),
            },
            force: params.force.unwrap_or(false),
        }
    }
}

#[tool_handler]
impl ServerHandler for CitationGraphServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Build citation graphs for research papers. Starting from seed DOIs, \
                 follows references (and optionally incoming citations) through \
                 OpenAlex and CrossRef with rate limiting, and returns a node/link \
                 graph suitable for force-directed rendering."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting research-orbits citation graph MCP server");

    let server = CitationGraphServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
