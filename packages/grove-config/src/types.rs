use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub index: Index,
	pub providers: Providers,
	pub retrieval: Retrieval,
	pub chat: Chat,
	pub namespaces: Namespaces,
	pub usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Index {
	pub qdrant: Qdrant,
	pub keyword: Option<KeywordStoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordStoreConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: RerankProviderConfig,
	pub llm: LlmProviderConfig,
	pub remote: Option<RemoteProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	/// Sent as `input_type` for asymmetric models that embed queries and
	/// documents differently.
	pub query_input_type: Option<String>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProviderConfig {
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_remote_search_path")]
	pub search_path: String,
	#[serde(default = "default_remote_health_path")]
	pub health_path: String,
	#[serde(default = "default_remote_timeout_ms")]
	pub timeout_ms: u64,
	pub model_route: Option<String>,
	pub max_tokens: Option<u32>,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retrieval {
	/// Per-namespace provider selection, `local` or `remote`. Static
	/// configuration, not load balancing.
	pub rag_provider: String,
	pub top_k: u32,
	pub min_score: f32,
	pub rerank: RerankSettings,
	#[serde(default)]
	pub include_metadata: bool,
	#[serde(default)]
	pub include_relationships: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankSettings {
	pub enabled: bool,
	/// Defaults to `top_k`; must never exceed it.
	pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
	#[serde(default = "default_condense_max_turns")]
	pub condense_max_turns: u32,
	pub agentic: Agentic,
	pub research: Research,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agentic {
	/// Upper bound on LLM turns in one agentic request, runaway-cost guard.
	pub max_steps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Research {
	pub max_sub_questions: u32,
	#[serde(default = "default_research_concurrency")]
	pub concurrency: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Namespaces {
	pub allowed: Vec<String>,
	#[serde(default = "default_namespace_cache_ttl_seconds")]
	pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
	/// Per-namespace retrieval-query ceiling; absent means unmetered.
	pub query_ceiling: Option<u64>,
}

fn default_remote_search_path() -> String {
	"/search".to_string()
}

fn default_remote_health_path() -> String {
	"/health".to_string()
}

fn default_remote_timeout_ms() -> u64 {
	30_000
}

fn default_condense_max_turns() -> u32 {
	10
}

fn default_research_concurrency() -> u32 {
	4
}

fn default_namespace_cache_ttl_seconds() -> u64 {
	300
}
