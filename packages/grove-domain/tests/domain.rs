use grove_domain::{Chunk, QueryRecord, QueryType, ResearchState, RetrievalResult};

fn chunk(id: &str, score: f32, rerank_score: Option<f32>) -> Chunk {
	Chunk {
		id: id.to_string(),
		text: format!("chunk {id}"),
		score,
		rerank_score,
		metadata: None,
		relationships: None,
	}
}

#[test]
fn query_log_round_trips_with_order() {
	let log = vec![
		QueryRecord::semantic("refund policy"),
		QueryRecord::keyword("refund"),
		QueryRecord::semantic("chargeback window"),
	];
	let encoded = serde_json::to_string(&log).expect("encode failed");
	let decoded: Vec<QueryRecord> = serde_json::from_str(&encoded).expect("decode failed");

	assert_eq!(decoded, log);
	assert_eq!(decoded[1].query_type, QueryType::Keyword);
}

#[test]
fn query_record_uses_wire_field_names() {
	let encoded =
		serde_json::to_value(QueryRecord::semantic("refund policy")).expect("encode failed");

	assert_eq!(encoded, serde_json::json!({ "type": "semantic", "query": "refund policy" }));
}

#[test]
fn rerank_score_wins_over_retrieval_score() {
	let mut state = ResearchState::new();

	state.merge_round(RetrievalResult {
		results: vec![chunk("a", 0.9, None)],
		queries: vec![QueryRecord::semantic("q1")],
	});
	state.merge_round(RetrievalResult {
		results: vec![chunk("a", 0.2, Some(0.95))],
		queries: vec![QueryRecord::semantic("q2")],
	});

	let survivor = state.chunk("a").expect("chunk a missing");

	assert_eq!(survivor.rerank_score, Some(0.95));
}

#[test]
fn ranked_chunks_sort_by_descending_effective_score() {
	let mut state = ResearchState::new();

	state.merge_round(RetrievalResult {
		results: vec![chunk("low", 0.1, None), chunk("high", 0.8, None), chunk("mid", 0.5, None)],
		queries: vec![QueryRecord::semantic("q")],
	});

	let ids: Vec<String> = state.ranked_chunks().into_iter().map(|c| c.id).collect();

	assert_eq!(ids, vec!["high", "mid", "low"]);
}

#[test]
fn total_queries_counts_calls_not_chunks() {
	let mut state = ResearchState::new();

	state.merge_round(RetrievalResult {
		results: vec![chunk("a", 0.4, None), chunk("b", 0.3, None), chunk("c", 0.2, None)],
		queries: vec![QueryRecord::semantic("q")],
	});

	assert_eq!(state.total_queries(), 1);
	assert_eq!(state.query_log().len(), 1);
}
