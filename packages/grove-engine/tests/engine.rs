use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove_config::Config;
use grove_domain::QueryType;
use grove_engine::{
	ChatEvent, ChatRequest, ConfigNamespaceStore, Error, GroveEngine, Providers, RerankProvider,
	SearchRequest, StatusEvent,
};
use grove_providers::keyword::KeywordHit;
use grove_testkit::{
	MemoryIndex, RecordingUsage, ScriptedLlm, StaticEmbedding, StaticKeyword, StubRemote,
	TableRerank, hit, remote_answer, test_config,
};

struct Harness {
	cfg: Config,
	index: Arc<MemoryIndex>,
	rerank: Arc<TableRerank>,
	remote: Arc<StubRemote>,
	keyword: Arc<StaticKeyword>,
	llm: Arc<ScriptedLlm>,
	usage: Arc<RecordingUsage>,
}
impl Default for Harness {
	fn default() -> Self {
		Self {
			cfg: test_config(),
			index: Arc::new(MemoryIndex::new(ten_hits())),
			rerank: Arc::new(TableRerank::new(Vec::new())),
			remote: Arc::new(StubRemote::failing("unused")),
			keyword: Arc::new(StaticKeyword::empty()),
			llm: Arc::new(ScriptedLlm::new()),
			usage: Arc::new(RecordingUsage::new()),
		}
	}
}
impl Harness {
	fn engine(&self) -> GroveEngine {
		self.engine_with_rerank(self.rerank.clone())
	}

	fn engine_with_rerank(&self, rerank: Arc<dyn RerankProvider>) -> GroveEngine {
		let providers = Providers::new(
			Arc::new(StaticEmbedding::new(8)),
			rerank,
			self.llm.clone(),
			self.keyword.clone(),
			self.remote.clone(),
		);
		let store = Arc::new(ConfigNamespaceStore::from_config(&self.cfg));

		GroveEngine::with_parts(
			self.cfg.clone(),
			self.index.clone(),
			providers,
			store,
			self.usage.clone(),
		)
	}
}

fn ten_hits() -> Vec<grove_index::IndexHit> {
	(0..10).map(|i| hit(&format!("c{i}"), 0.95 - 0.05 * i as f32, &format!("passage {i}"))).collect()
}

fn search_request(query: &str) -> SearchRequest {
	serde_json::from_value(serde_json::json!({ "namespace": "docs", "query": query }))
		.expect("request build failed")
}

fn chat_request(mode: &str, message: &str) -> ChatRequest {
	serde_json::from_value(serde_json::json!({
		"namespace": "docs",
		"mode": mode,
		"messages": [{ "role": "user", "content": message }],
	}))
	.expect("request build failed")
}

async fn run_chat(
	engine: &GroveEngine,
	req: ChatRequest,
	cancel: CancellationToken,
) -> (Result<(), Error>, Vec<ChatEvent>) {
	let (tx, mut rx) = mpsc::channel(64);
	let chat = engine.chat(req, tx, cancel);
	let collector = async {
		let mut events = Vec::new();

		while let Some(event) = rx.recv().await {
			events.push(event);
		}

		events
	};

	tokio::join!(chat, collector)
}

fn event_names(events: &[ChatEvent]) -> Vec<&'static str> {
	events.iter().map(ChatEvent::name).collect()
}

#[tokio::test]
async fn search_reranks_ten_candidates_down_to_five() {
	let mut harness = Harness::default();

	// Rerank prefers later passages, reversing the retrieval order.
	let scores: Vec<(String, f32)> =
		(0..10).map(|i| (format!("passage {i}"), 0.1 * i as f32)).collect();

	harness.rerank =
		Arc::new(TableRerank::new(scores.iter().map(|(text, score)| (text.as_str(), *score)).collect()));

	let engine = harness.engine();
	let response = engine.search(search_request("refund policy")).await.expect("search failed");

	assert_eq!(response.chunks.len(), 5);
	assert_eq!(response.chunks[0].id, "c9");
	assert!(response.chunks.iter().all(|chunk| chunk.rerank_score.is_some()));
	for pair in response.chunks.windows(2) {
		assert!(pair[0].effective_score() >= pair[1].effective_score());
	}
	assert_eq!(response.total_queries, 1);
	assert_eq!(response.provider, "local");
	assert_eq!(harness.usage.recorded(), vec![("docs".to_string(), 1)]);
}

#[tokio::test]
async fn rerank_limit_above_top_k_is_rejected_before_retrieval() {
	let harness = Harness::default();
	let engine = harness.engine();
	let mut req = search_request("refund policy");

	req.overrides.rerank_limit = Some(11);

	let err = engine.search(req).await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert_eq!(harness.index.queries_served(), 0);
	assert!(harness.usage.recorded().is_empty());
}

#[tokio::test]
async fn rerank_failure_keeps_the_retrieval_order() {
	let harness = Harness::default();
	let engine = harness.engine_with_rerank(Arc::new(TableRerank::failing()));
	let response = engine.search(search_request("refund policy")).await.expect("search failed");

	assert_eq!(response.chunks.len(), 10);
	assert_eq!(response.chunks[0].id, "c0");
	assert!(response.chunks.iter().all(|chunk| chunk.rerank_score.is_none()));
}

#[tokio::test]
async fn equal_scores_keep_backend_order() {
	let mut harness = Harness::default();

	harness.index = Arc::new(MemoryIndex::new(vec![
		hit("first", 0.5, "alpha"),
		hit("second", 0.5, "beta"),
		hit("third", 0.5, "gamma"),
	]));
	harness.cfg.retrieval.rerank.enabled = false;

	let engine = harness.engine();
	let response = engine.search(search_request("anything")).await.expect("search failed");
	let ids: Vec<&str> = response.chunks.iter().map(|chunk| chunk.id.as_str()).collect();

	assert_eq!(ids, ["first", "second", "third"]);
}

#[tokio::test]
async fn remote_failure_falls_back_to_the_local_shape() {
	let mut harness = Harness::default();

	harness.cfg.retrieval.rag_provider = "remote".to_string();
	harness.remote = Arc::new(StubRemote::failing("operation timed out"));
	harness.cfg.retrieval.rerank.enabled = false;

	let engine = harness.engine();
	let response = engine.search(search_request("refund policy")).await.expect("search failed");

	assert_eq!(harness.remote.calls(), 1);
	assert_eq!(response.provider, "local");
	assert!(response.remote.is_none());
	assert_eq!(response.chunks.len(), 10);
	assert_eq!(response.total_queries, 1);
}

#[tokio::test]
async fn remote_success_translates_sources_into_chunks() {
	let mut harness = Harness::default();

	harness.cfg.retrieval.rag_provider = "remote".to_string();
	harness.remote = Arc::new(StubRemote::answering(remote_answer("Refunds take five days.", vec![
		(0, 0.9, "Refund policy says five days."),
		(1, 0.7, "Digital goods differ."),
	])));

	let engine = harness.engine();
	let response = engine.search(search_request("refund policy")).await.expect("search failed");

	assert_eq!(response.provider, "remote");
	assert_eq!(response.chunks.len(), 2);
	assert_eq!(response.chunks[0].id, "remote-0");
	assert_eq!(response.queries.len(), 1);
	assert_eq!(response.queries[0].query_type, QueryType::Semantic);
	assert!(response.remote.is_some());
	assert_eq!(harness.index.queries_served(), 0);
}

#[tokio::test]
async fn keyword_mode_serves_from_the_keyword_store() {
	let mut harness = Harness::default();

	harness.keyword = Arc::new(StaticKeyword::new(vec![
		KeywordHit { id: "k1".to_string(), score: 7.2, text: "refund refund".to_string(), metadata: None },
		KeywordHit { id: "k2".to_string(), score: 3.1, text: "refund".to_string(), metadata: None },
	]));

	let engine = harness.engine();
	let mut req = search_request("refund");

	req.overrides.mode = Some("keyword".to_string());
	req.overrides.rerank = Some(false);

	let response = engine.search(req).await.expect("search failed");

	assert_eq!(response.queries[0].query_type, QueryType::Keyword);
	assert_eq!(response.chunks[0].id, "k1");
	assert_eq!(harness.index.queries_served(), 0);
}

#[tokio::test]
async fn keyword_mode_without_a_store_is_rejected() {
	let mut harness = Harness::default();

	harness.cfg.index.keyword = None;

	let engine = harness.engine();
	let mut req = search_request("refund");

	req.overrides.mode = Some("keyword".to_string());

	let err = engine.search(req).await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn unknown_namespace_is_not_found() {
	let harness = Harness::default();
	let engine = harness.engine();
	let mut req = search_request("refund policy");

	req.namespace = "nope".to_string();

	let err = engine.search(req).await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::NotFound { .. }));
	assert_eq!(harness.index.queries_served(), 0);
}

#[tokio::test]
async fn quota_denial_blocks_before_any_retrieval() {
	let mut harness = Harness::default();

	harness.usage = Arc::new(RecordingUsage::denying());

	let engine = harness.engine();
	let err = engine.search(search_request("refund policy")).await.expect_err("Expected denial.");

	assert!(matches!(err, Error::RateLimited { .. }));
	assert_eq!(harness.index.queries_served(), 0);
	assert!(harness.usage.recorded().is_empty());
}

#[tokio::test]
async fn agentic_loop_counts_queries_not_chunks() {
	let harness = Harness::default();

	harness.llm.push_stream_search("call_1", "refund window");
	harness.llm.push_stream_answer("Refunds take five days.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("agentic", "How long do refunds take?"), CancellationToken::new())
			.await;

	result.expect("chat failed");

	assert_eq!(event_names(&events), ["status", "status", "status", "status", "sources", "delta", "done"]);

	let Some(ChatEvent::Done { total_queries, queries }) = events.last() else {
		panic!("Expected a done event.");
	};

	// One retrieval call, several chunks merged.
	assert_eq!(*total_queries, 1);
	assert_eq!(queries.len(), 1);
	assert_eq!(harness.usage.recorded(), vec![("docs".to_string(), 1)]);
}

#[tokio::test]
async fn agentic_loop_merges_rounds_without_duplicate_chunks() {
	let harness = Harness::default();

	harness.llm.push_stream_search("call_1", "refund window");
	harness.llm.push_stream_search("call_2", "digital goods refunds");
	harness.llm.push_stream_answer("Refunds take five days; digital goods differ.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("agentic", "Refund rules?"), CancellationToken::new()).await;

	result.expect("chat failed");

	let sources = events
		.iter()
		.find_map(|event| match event {
			ChatEvent::Sources { chunks } => Some(chunks.clone()),
			_ => None,
		})
		.expect("Expected a sources event.");
	let mut ids: Vec<&str> = sources.iter().map(|chunk| chunk.id.as_str()).collect();

	ids.sort_unstable();
	ids.dedup();
	assert_eq!(ids.len(), sources.len());

	let Some(ChatEvent::Done { total_queries, .. }) = events.last() else {
		panic!("Expected a done event.");
	};

	assert_eq!(*total_queries, 2);
	assert_eq!(harness.usage.recorded(), vec![("docs".to_string(), 2)]);
}

#[tokio::test]
async fn agentic_sources_arrive_before_the_first_delta() {
	let harness = Harness::default();

	harness.llm.push_stream_search("call_1", "refund window");
	harness.llm.push_stream_answer("Five days.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("agentic", "Refunds?"), CancellationToken::new()).await;

	result.expect("chat failed");

	let sources_at = events.iter().position(|event| event.name() == "sources");
	let first_delta_at = events.iter().position(|event| event.name() == "delta");

	assert!(sources_at.expect("missing sources") < first_delta_at.expect("missing delta"));
	assert_eq!(events.iter().filter(|event| event.name() == "sources").count(), 1);
}

#[tokio::test]
async fn tool_turn_preamble_never_leaks_into_the_answer_stream() {
	let harness = Harness::default();

	// The model narrates before committing to a tool call; that content
	// must not open the answer.
	harness.llm.push_stream_search_with_preamble("Let me look that up.", "call_1", "refund window");
	harness.llm.push_stream_answer("Five days.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("agentic", "Refunds?"), CancellationToken::new()).await;

	result.expect("chat failed");

	assert_eq!(events.iter().filter(|event| event.name() == "sources").count(), 1);

	let sources_at =
		events.iter().position(|event| event.name() == "sources").expect("missing sources");
	let first_delta_at =
		events.iter().position(|event| event.name() == "delta").expect("missing delta");

	assert!(sources_at < first_delta_at);

	let deltas: Vec<&str> = events
		.iter()
		.filter_map(|event| match event {
			ChatEvent::Delta { text } => Some(text.as_str()),
			_ => None,
		})
		.collect();

	assert_eq!(deltas, ["Five days."]);

	let chunks = events
		.iter()
		.find_map(|event| match event {
			ChatEvent::Sources { chunks } => Some(chunks),
			_ => None,
		})
		.expect("Expected a sources event.");

	assert!(!chunks.is_empty());
}

#[tokio::test]
async fn cancellation_before_the_loop_emits_nothing() {
	let harness = Harness::default();
	let engine = harness.engine();
	let cancel = CancellationToken::new();

	cancel.cancel();

	let (result, events) = run_chat(&engine, chat_request("agentic", "Refunds?"), cancel).await;

	assert!(matches!(result, Err(Error::Cancelled)));
	assert!(events.is_empty());
	assert!(harness.usage.recorded().is_empty());
}

#[tokio::test]
async fn mid_loop_cancellation_stops_events_and_usage() {
	let harness = Harness::default();

	harness.llm.push_stream_search("call_1", "refund window");
	harness.llm.push_stream_hang();

	let engine = harness.engine();
	let cancel = CancellationToken::new();
	let (tx, mut rx) = mpsc::channel(64);
	let chat = engine.chat(chat_request("agentic", "Refunds?"), tx, cancel.clone());
	let collector = async {
		let mut events = Vec::new();

		while let Some(event) = rx.recv().await {
			// The third status is the answer turn, which hangs until the
			// client walks away.
			if events.iter().filter(|event: &&ChatEvent| event.name() == "status").count() == 2
				&& event.name() == "status"
			{
				cancel.cancel();
			}

			events.push(event);
		}

		events
	};
	let (result, events) = tokio::join!(chat, collector);

	assert!(matches!(result, Err(Error::Cancelled)));
	assert!(events.iter().all(|event| event.name() == "status"));
	assert!(harness.usage.recorded().is_empty());
}

#[tokio::test]
async fn deep_research_counts_only_successful_sub_questions() {
	let mut harness = Harness::default();

	// Sequential fan-out keeps the scripted queues aligned with plan order.
	harness.cfg.chat.research.concurrency = 1;
	harness.llm.push_json(serde_json::json!({
		"sub_questions": ["refund window", "digital goods", "gift cards"]
	}));
	harness.llm.push_text("Refunds take five days.");
	harness.llm.push_text_failure("Scripted summarize failure.");
	harness.llm.push_text("Gift cards are non-refundable.");
	harness.llm.push_stream_answer("Five days; gift cards excluded. Digital goods unknown.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("deep-research", "Explain the refund rules."), CancellationToken::new())
			.await;

	result.expect("chat failed");

	let Some(ChatEvent::Done { total_queries, queries }) = events.last() else {
		panic!("Expected a done event.");
	};

	assert_eq!(*total_queries, 2);
	assert_eq!(queries.len(), 2);
	assert_eq!(harness.usage.recorded(), vec![("docs".to_string(), 2)]);

	let searching = events
		.iter()
		.find_map(|event| match event {
			ChatEvent::Status(StatusEvent::Searching { queries }) => Some(queries.len()),
			_ => None,
		})
		.expect("Expected a searching status.");

	// The plan is announced in full even though one branch later fails.
	assert_eq!(searching, 3);
}

#[tokio::test]
async fn deep_research_plan_failure_is_fatal() {
	let harness = Harness::default();

	harness.llm.push_json_failure("Scripted plan failure.");

	let engine = harness.engine();
	let (result, events) =
		run_chat(&engine, chat_request("deep-research", "Explain the refund rules."), CancellationToken::new())
			.await;

	assert!(matches!(result, Err(Error::Llm { .. })));
	assert!(events.iter().all(|event| event.name() == "status"));
	assert!(harness.usage.recorded().is_empty());
}

#[tokio::test]
async fn condensation_feeds_deep_research_with_one_query() {
	let mut harness = Harness::default();

	harness.cfg.chat.research.concurrency = 1;
	harness.llm.push_text("refund window for digital goods");
	harness.llm.push_json(serde_json::json!({ "sub_questions": ["digital goods refunds"] }));
	harness.llm.push_text("Digital goods are refundable within 14 days.");
	harness.llm.push_stream_answer("Fourteen days.");

	let engine = harness.engine();
	let req: ChatRequest = serde_json::from_value(serde_json::json!({
		"namespace": "docs",
		"mode": "deep-research",
		"messages": [
			{ "role": "user", "content": "What is the refund window?" },
			{ "role": "assistant", "content": "Thirty days for physical goods." },
			{ "role": "user", "content": "And for digital goods?" },
		],
	}))
	.expect("request build failed");
	let (result, events) = run_chat(&engine, req, CancellationToken::new()).await;

	result.expect("chat failed");
	assert_eq!(events.iter().filter(|event| event.name() == "done").count(), 1);
}
