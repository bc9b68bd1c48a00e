//! Deterministic fakes for every provider seam, plus a ready-made config.
//! Everything here is scripted up front and asserted on afterwards; nothing
//! touches the network.

use std::{
	collections::VecDeque,
	future,
	sync::{
		Mutex,
		atomic::{AtomicU32, Ordering},
	},
};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use grove_config::{
	Agentic, Chat, Config, EmbeddingProviderConfig, Index, KeywordStoreConfig, LlmProviderConfig,
	Namespaces, Providers as ProviderConfigs, Qdrant, RemoteProviderConfig, Research, Retrieval,
	RerankProviderConfig, RerankSettings, Service, Usage,
};
use grove_engine::{
	BoxFuture, EmbeddingProvider, Error, KeywordProvider, LlmProvider, RemoteProvider,
	RerankProvider, Result as EngineResult, UsageAccountant,
};
use grove_index::{
	BoxFuture as IndexFuture, IndexDimensions, IndexHit, IndexQuery, Result as IndexResult,
	VectorIndex, WarmCacheOutcome,
};
use grove_providers::{
	keyword::KeywordHit,
	llm::{ChatTurn as ModelTurn, LlmDelta, ToolCall},
	remote::{RemoteAnswer, RemoteSource},
	rerank::RerankHit,
};

/// Config wired for the fakes: namespace `docs`, `top_k` 10, rerank limit 5,
/// four agentic steps, research fan-out of two.
pub fn test_config() -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "debug".to_string() },
		index: Index {
			qdrant: Qdrant {
				url: "http://127.0.0.1:6334".to_string(),
				collection: "grove_test".to_string(),
				vector_dim: 8,
			},
			keyword: Some(KeywordStoreConfig {
				api_base: "http://127.0.0.1:0".to_string(),
				api_key: "test".to_string(),
				path: "/keyword/search".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			}),
		},
		providers: ProviderConfigs {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:0".to_string(),
				api_key: "test".to_string(),
				path: "/embed".to_string(),
				model: "test-embed".to_string(),
				dimensions: 8,
				query_input_type: None,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			rerank: RerankProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:0".to_string(),
				api_key: "test".to_string(),
				path: "/rerank".to_string(),
				model: "test-rerank".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			llm: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:0".to_string(),
				api_key: "test".to_string(),
				path: "/chat/completions".to_string(),
				model: "test-llm".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			remote: Some(RemoteProviderConfig {
				api_base: "http://127.0.0.1:0".to_string(),
				api_key: "test".to_string(),
				search_path: "/search".to_string(),
				health_path: "/health".to_string(),
				timeout_ms: 1_000,
				model_route: None,
				max_tokens: None,
				default_headers: Map::new(),
			}),
		},
		retrieval: Retrieval {
			rag_provider: "local".to_string(),
			top_k: 10,
			min_score: 0.0,
			rerank: RerankSettings { enabled: true, limit: Some(5) },
			include_metadata: false,
			include_relationships: false,
		},
		chat: Chat {
			condense_max_turns: 10,
			agentic: Agentic { max_steps: 4 },
			research: Research { max_sub_questions: 5, concurrency: 2 },
		},
		namespaces: Namespaces { allowed: vec!["docs".to_string()], cache_ttl_seconds: 300 },
		usage: Usage { query_ceiling: None },
	}
}

pub fn hit(id: &str, score: f32, text: &str) -> IndexHit {
	IndexHit {
		id: id.to_string(),
		score,
		text: text.to_string(),
		metadata: None,
		relationships: None,
	}
}

/// In-memory stand-in for the vector index. Hits are served in scripted
/// order, filtered by `min_score` and truncated to `top_k`; the query
/// vector itself is ignored.
pub struct MemoryIndex {
	hits: Mutex<Vec<IndexHit>>,
	queries: AtomicU32,
	fail: bool,
}
impl MemoryIndex {
	pub fn new(hits: Vec<IndexHit>) -> Self {
		Self { hits: Mutex::new(hits), queries: AtomicU32::new(0), fail: false }
	}

	pub fn failing() -> Self {
		Self { hits: Mutex::new(Vec::new()), queries: AtomicU32::new(0), fail: true }
	}

	pub fn queries_served(&self) -> u32 {
		self.queries.load(Ordering::SeqCst)
	}

	pub fn set_hits(&self, hits: Vec<IndexHit>) {
		*self.hits.lock().expect("memory index poisoned") = hits;
	}
}
impl VectorIndex for MemoryIndex {
	fn query<'a>(
		&'a self,
		_vector: &'a [f32],
		query: &'a IndexQuery,
	) -> IndexFuture<'a, IndexResult<Vec<IndexHit>>> {
		Box::pin(async move {
			if self.fail {
				return Err(grove_index::Error::Backend("Scripted index failure.".to_string()));
			}

			self.queries.fetch_add(1, Ordering::SeqCst);

			let hits = self.hits.lock().expect("memory index poisoned");
			let mut served: Vec<IndexHit> = hits
				.iter()
				.filter(|hit| hit.score >= query.min_score)
				.take(query.top_k as usize)
				.cloned()
				.collect();

			if !query.with_metadata {
				for hit in &mut served {
					hit.metadata = None;
				}
			}
			if !query.with_relationships {
				for hit in &mut served {
					hit.relationships = None;
				}
			}

			Ok(served)
		})
	}

	fn dimensions(&self) -> IndexDimensions {
		IndexDimensions::Any
	}

	fn warm_cache(&self) -> IndexFuture<'_, IndexResult<WarmCacheOutcome>> {
		Box::pin(async { Ok(WarmCacheOutcome::Unsupported) })
	}
}

/// Embeds every text as a constant-width vector; deterministic and cheap.
pub struct StaticEmbedding {
	pub width: usize,
}
impl StaticEmbedding {
	pub fn new(width: usize) -> Self {
		Self { width }
	}
}
impl EmbeddingProvider for StaticEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|_| vec![0.1; self.width]).collect()) })
	}
}

pub struct FailingEmbedding;
impl EmbeddingProvider for FailingEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		_texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async { Err(color_eyre::eyre::eyre!("Scripted embedding failure.")) })
	}
}

/// Reranks by table lookup on document text. Unknown documents score zero.
pub struct TableRerank {
	scores: Vec<(String, f32)>,
	fail: bool,
}
impl TableRerank {
	pub fn new(scores: Vec<(&str, f32)>) -> Self {
		Self {
			scores: scores.into_iter().map(|(text, score)| (text.to_string(), score)).collect(),
			fail: false,
		}
	}

	pub fn failing() -> Self {
		Self { scores: Vec::new(), fail: true }
	}

	fn score(&self, doc: &str) -> f32 {
		self.scores
			.iter()
			.find(|(text, _)| text == doc)
			.map(|(_, score)| *score)
			.unwrap_or(0.0)
	}
}
impl RerankProvider for TableRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a RerankProviderConfig,
		_query: &'a str,
		docs: &'a [String],
		limit: usize,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RerankHit>>> {
		Box::pin(async move {
			if self.fail {
				return Err(color_eyre::eyre::eyre!("Scripted rerank failure."));
			}

			let mut hits: Vec<RerankHit> = docs
				.iter()
				.enumerate()
				.map(|(index, doc)| RerankHit { index, score: self.score(doc) })
				.collect();

			hits.sort_by(|a, b| b.score.total_cmp(&a.score));
			hits.truncate(limit);

			Ok(hits)
		})
	}
}

enum TextReply {
	Text(String),
	Failure(String),
}

enum JsonReply {
	Json(Value),
	Failure(String),
}

enum StreamReply {
	Answer(String),
	ToolCalls(Vec<ToolCall>),
	/// Content streamed ahead of the tool-call delta, as OpenAI-style
	/// providers may do in a tool turn.
	PreambleToolCalls { preamble: String, calls: Vec<ToolCall> },
	Failure(String),
	/// Never resolves; pairs with a cancellation token in tests.
	Hang,
}

/// Model fake with one FIFO queue per entry point, so concurrent callers
/// stay deterministic. An exhausted queue is a scripting bug and fails the
/// call loudly.
#[derive(Default)]
pub struct ScriptedLlm {
	text: Mutex<VecDeque<TextReply>>,
	json: Mutex<VecDeque<JsonReply>>,
	stream: Mutex<VecDeque<StreamReply>>,
}
impl ScriptedLlm {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_text(&self, text: &str) {
		self.text.lock().expect("scripted llm poisoned").push_back(TextReply::Text(text.to_string()));
	}

	pub fn push_text_failure(&self, message: &str) {
		self.text
			.lock()
			.expect("scripted llm poisoned")
			.push_back(TextReply::Failure(message.to_string()));
	}

	pub fn push_json(&self, value: Value) {
		self.json.lock().expect("scripted llm poisoned").push_back(JsonReply::Json(value));
	}

	pub fn push_json_failure(&self, message: &str) {
		self.json
			.lock()
			.expect("scripted llm poisoned")
			.push_back(JsonReply::Failure(message.to_string()));
	}

	pub fn push_stream_answer(&self, text: &str) {
		self.stream
			.lock()
			.expect("scripted llm poisoned")
			.push_back(StreamReply::Answer(text.to_string()));
	}

	pub fn push_stream_search(&self, call_id: &str, query: &str) {
		let call = ToolCall {
			id: call_id.to_string(),
			name: "search".to_string(),
			arguments: serde_json::json!({ "query": query }).to_string(),
		};

		self.stream
			.lock()
			.expect("scripted llm poisoned")
			.push_back(StreamReply::ToolCalls(vec![call]));
	}

	pub fn push_stream_search_with_preamble(&self, preamble: &str, call_id: &str, query: &str) {
		let call = ToolCall {
			id: call_id.to_string(),
			name: "search".to_string(),
			arguments: serde_json::json!({ "query": query }).to_string(),
		};

		self.stream.lock().expect("scripted llm poisoned").push_back(
			StreamReply::PreambleToolCalls { preamble: preamble.to_string(), calls: vec![call] },
		);
	}

	pub fn push_stream_tool_calls(&self, calls: Vec<ToolCall>) {
		self.stream.lock().expect("scripted llm poisoned").push_back(StreamReply::ToolCalls(calls));
	}

	pub fn push_stream_failure(&self, message: &str) {
		self.stream
			.lock()
			.expect("scripted llm poisoned")
			.push_back(StreamReply::Failure(message.to_string()));
	}

	pub fn push_stream_hang(&self) {
		self.stream.lock().expect("scripted llm poisoned").push_back(StreamReply::Hang);
	}
}
impl LlmProvider for ScriptedLlm {
	fn generate<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(async move {
			match self.text.lock().expect("scripted llm poisoned").pop_front() {
				Some(TextReply::Text(text)) => Ok(text),
				Some(TextReply::Failure(message)) => Err(color_eyre::eyre::eyre!(message)),
				None => Err(color_eyre::eyre::eyre!("ScriptedLlm text queue is empty.")),
			}
		})
	}

	fn generate_json<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<Value>> {
		Box::pin(async move {
			match self.json.lock().expect("scripted llm poisoned").pop_front() {
				Some(JsonReply::Json(value)) => Ok(value),
				Some(JsonReply::Failure(message)) => Err(color_eyre::eyre::eyre!(message)),
				None => Err(color_eyre::eyre::eyre!("ScriptedLlm json queue is empty.")),
			}
		})
	}

	fn stream_chat<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
		_tools: &'a [Value],
		delta_tx: mpsc::Sender<LlmDelta>,
	) -> BoxFuture<'a, color_eyre::Result<ModelTurn>> {
		Box::pin(async move {
			let reply = self.stream.lock().expect("scripted llm poisoned").pop_front();

			match reply {
				Some(StreamReply::Answer(text)) => {
					delta_tx
						.send(LlmDelta::Content(text.clone()))
						.await
						.map_err(|_| color_eyre::eyre::eyre!("Stream consumer dropped."))?;

					Ok(ModelTurn { content: text, tool_calls: Vec::new() })
				},
				Some(StreamReply::ToolCalls(calls)) => {
					delta_tx
						.send(LlmDelta::ToolCallStarted)
						.await
						.map_err(|_| color_eyre::eyre::eyre!("Stream consumer dropped."))?;

					Ok(ModelTurn { content: String::new(), tool_calls: calls })
				},
				Some(StreamReply::PreambleToolCalls { preamble, calls }) => {
					delta_tx
						.send(LlmDelta::Content(preamble.clone()))
						.await
						.map_err(|_| color_eyre::eyre::eyre!("Stream consumer dropped."))?;
					delta_tx
						.send(LlmDelta::ToolCallStarted)
						.await
						.map_err(|_| color_eyre::eyre::eyre!("Stream consumer dropped."))?;

					Ok(ModelTurn { content: preamble, tool_calls: calls })
				},
				Some(StreamReply::Failure(message)) => Err(color_eyre::eyre::eyre!(message)),
				Some(StreamReply::Hang) => future::pending().await,
				None => Err(color_eyre::eyre::eyre!("ScriptedLlm stream queue is empty.")),
			}
		})
	}
}

pub fn remote_answer(answer: &str, sources: Vec<(u64, f32, &str)>) -> RemoteAnswer {
	RemoteAnswer {
		answer: answer.to_string(),
		sources: sources
			.into_iter()
			.map(|(idx, score, preview)| RemoteSource {
				idx,
				score,
				metadata: None,
				preview: preview.to_string(),
				url: None,
			})
			.collect(),
		metadata: None,
	}
}

/// Managed-provider fake: either always answers or always fails.
pub struct StubRemote {
	reply: Result<RemoteAnswer, String>,
	calls: AtomicU32,
}
impl StubRemote {
	pub fn answering(answer: RemoteAnswer) -> Self {
		Self { reply: Ok(answer), calls: AtomicU32::new(0) }
	}

	pub fn failing(message: &str) -> Self {
		Self { reply: Err(message.to_string()), calls: AtomicU32::new(0) }
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RemoteProvider for StubRemote {
	fn search<'a>(
		&'a self,
		_cfg: &'a RemoteProviderConfig,
		_query: &'a str,
		_filters: Option<&'a Value>,
		_mode: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<RemoteAnswer>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			match &self.reply {
				Ok(answer) => Ok(answer.clone()),
				Err(message) => Err(color_eyre::eyre::eyre!(message.clone())),
			}
		})
	}
}

/// Keyword store fake serving a fixed hit list.
pub struct StaticKeyword {
	hits: Vec<KeywordHit>,
}
impl StaticKeyword {
	pub fn new(hits: Vec<KeywordHit>) -> Self {
		Self { hits }
	}

	pub fn empty() -> Self {
		Self { hits: Vec::new() }
	}
}
impl KeywordProvider for StaticKeyword {
	fn search<'a>(
		&'a self,
		_cfg: &'a KeywordStoreConfig,
		_query: &'a str,
		limit: u32,
		min_score: f32,
		_filter: Option<&'a Value>,
	) -> BoxFuture<'a, color_eyre::Result<Vec<KeywordHit>>> {
		Box::pin(async move {
			Ok(self
				.hits
				.iter()
				.filter(|hit| hit.score >= min_score)
				.take(limit as usize)
				.cloned()
				.collect())
		})
	}
}

/// Accountant that records every increment for assertions. Quota can be
/// scripted to always deny.
#[derive(Default)]
pub struct RecordingUsage {
	deny: bool,
	recorded: Mutex<Vec<(String, u32)>>,
}
impl RecordingUsage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn denying() -> Self {
		Self { deny: true, recorded: Mutex::new(Vec::new()) }
	}

	pub fn recorded(&self) -> Vec<(String, u32)> {
		self.recorded.lock().expect("recording usage poisoned").clone()
	}
}
impl UsageAccountant for RecordingUsage {
	fn check_quota<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, EngineResult<()>> {
		Box::pin(async move {
			if self.deny {
				return Err(Error::RateLimited {
					message: format!("Namespace {namespace:?} is over its scripted quota."),
				});
			}

			Ok(())
		})
	}

	fn record_queries(&self, namespace: &str, queries: u32) {
		self.recorded
			.lock()
			.expect("recording usage poisoned")
			.push((namespace.to_string(), queries));
	}
}
