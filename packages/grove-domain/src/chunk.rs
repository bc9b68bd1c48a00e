use serde_json::Value;

/// A scored unit of retrieved text. Identity is `id`, a stable
/// content-address assigned by the index; `score` and `rerank_score` are
/// retrieval-time annotations, not content.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Chunk {
	pub id: String,
	pub text: String,
	pub score: f32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub rerank_score: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub relationships: Option<Value>,
}
impl Chunk {
	/// Ranking key: rerank score when the round was reranked, retrieval
	/// score otherwise.
	pub fn effective_score(&self) -> f32 {
		self.rerank_score.unwrap_or(self.score)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
	Semantic,
	Keyword,
}

/// One entry of the append-only per-request retrieval log. Insertion order
/// is issuance order and is significant for citation display.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueryRecord {
	#[serde(rename = "type")]
	pub query_type: QueryType,
	pub query: String,
}
impl QueryRecord {
	pub fn semantic(query: impl Into<String>) -> Self {
		Self { query_type: QueryType::Semantic, query: query.into() }
	}

	pub fn keyword(query: impl Into<String>) -> Self {
		Self { query_type: QueryType::Keyword, query: query.into() }
	}
}

/// Output of one retrieval round. `results` are ordered by final rank,
/// post-rerank when reranking was requested.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievalResult {
	pub results: Vec<Chunk>,
	pub queries: Vec<QueryRecord>,
}
