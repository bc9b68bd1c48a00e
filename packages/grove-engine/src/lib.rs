pub mod agentic;
pub mod chat;
pub mod condense;
pub mod events;
pub mod pipeline;
pub mod research;
pub mod retrieve;
pub mod router;
pub mod search;
pub mod usage;

mod error;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::mpsc;

pub use chat::{ChatMode, ChatRequest};
pub use error::Error;
pub use events::{ChatEvent, StatusEvent};
pub use pipeline::{
	ConfigNamespaceStore, NamespaceCache, NamespaceSettings, NamespaceStore, PipelineConfig,
	RagProvider, RetrievalMode, RetrievalOverrides,
};
pub use search::{RemoteMeta, SearchRequest, SearchResponse};
pub use usage::{MeteredUsage, UsageAccountant};

use grove_config::{
	Config, EmbeddingProviderConfig, KeywordStoreConfig, LlmProviderConfig, RemoteProviderConfig,
	RerankProviderConfig,
};
use grove_index::VectorIndex;
use grove_providers::{
	embedding, keyword,
	keyword::KeywordHit,
	llm,
	llm::{ChatTurn as ModelTurn, LlmDelta},
	remote,
	remote::RemoteAnswer,
	rerank,
	rerank::RerankHit,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RerankHit>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>>;

	fn generate_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>>;

	/// Streams one model turn, pushing deltas into `delta_tx` as they
	/// arrive. Dropping the receiver aborts the turn.
	fn stream_chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		tools: &'a [Value],
		delta_tx: mpsc::Sender<LlmDelta>,
	) -> BoxFuture<'a, color_eyre::Result<ModelTurn>>;
}

pub trait KeywordProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a KeywordStoreConfig,
		query: &'a str,
		limit: u32,
		min_score: f32,
		filter: Option<&'a Value>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<KeywordHit>>>;
}

pub trait RemoteProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a RemoteProviderConfig,
		query: &'a str,
		filters: Option<&'a Value>,
		mode: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<RemoteAnswer>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub llm: Arc<dyn LlmProvider>,
	pub keyword: Arc<dyn KeywordProvider>,
	pub remote: Arc<dyn RemoteProvider>,
}

/// HTTP-backed implementation of every provider trait.
pub struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RerankHit>>> {
		Box::pin(rerank::rerank(cfg, query, docs, limit))
	}
}

impl LlmProvider for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(llm::generate(cfg, messages))
	}

	fn generate_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(llm::generate_json(cfg, messages))
	}

	fn stream_chat<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
		tools: &'a [Value],
		delta_tx: mpsc::Sender<LlmDelta>,
	) -> BoxFuture<'a, color_eyre::Result<ModelTurn>> {
		Box::pin(async move { llm::stream_chat(cfg, messages, tools, &delta_tx).await })
	}
}

impl KeywordProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a KeywordStoreConfig,
		query: &'a str,
		limit: u32,
		min_score: f32,
		filter: Option<&'a Value>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<KeywordHit>>> {
		Box::pin(keyword::search(cfg, query, limit, min_score, filter))
	}
}

impl RemoteProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a RemoteProviderConfig,
		query: &'a str,
		filters: Option<&'a Value>,
		mode: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<RemoteAnswer>> {
		Box::pin(remote::search(cfg, query, filters, mode))
	}
}

impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		llm: Arc<dyn LlmProvider>,
		keyword: Arc<dyn KeywordProvider>,
		remote: Arc<dyn RemoteProvider>,
	) -> Self {
		Self { embedding, rerank, llm, keyword, remote }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			rerank: provider.clone(),
			llm: provider.clone(),
			keyword: provider.clone(),
			remote: provider,
		}
	}
}

pub struct GroveEngine {
	pub cfg: Config,
	pub index: Arc<dyn VectorIndex>,
	pub providers: Providers,
	pub namespaces: NamespaceCache,
	pub usage: Arc<dyn UsageAccountant>,
}
impl GroveEngine {
	/// Wires the default HTTP providers, the config-backed namespace store
	/// and the in-memory usage accountant.
	pub fn new(cfg: Config, index: Arc<dyn VectorIndex>) -> Self {
		let store = Arc::new(ConfigNamespaceStore::from_config(&cfg));
		let ttl = Duration::from_secs(cfg.namespaces.cache_ttl_seconds);
		let usage = Arc::new(MeteredUsage::new(cfg.usage.query_ceiling));

		Self {
			cfg,
			index,
			providers: Providers::default(),
			namespaces: NamespaceCache::new(store, ttl),
			usage,
		}
	}

	pub fn with_parts(
		cfg: Config,
		index: Arc<dyn VectorIndex>,
		providers: Providers,
		store: Arc<dyn NamespaceStore>,
		usage: Arc<dyn UsageAccountant>,
	) -> Self {
		let ttl = Duration::from_secs(cfg.namespaces.cache_ttl_seconds);

		Self { cfg, index, providers, namespaces: NamespaceCache::new(store, ttl), usage }
	}
}
