use grove_domain::{Chunk, QueryRecord, ResearchState};

use crate::{
	Error, GroveEngine, RagProvider, Result, RetrievalOverrides, pipeline, router,
};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SearchRequest {
	pub namespace: String,
	pub query: String,
	#[serde(flatten)]
	pub overrides: RetrievalOverrides,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResponse {
	pub total_queries: u32,
	pub queries: Vec<QueryRecord>,
	pub chunks: Vec<Chunk>,
	pub provider: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remote: Option<RemoteMeta>,
}

/// Opaque annotations from the managed provider, surfaced for
/// observability only.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RemoteMeta {
	pub latency_ms: u64,
	pub cached: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
}

impl GroveEngine {
	/// One-shot retrieval. Remote-routed namespaces try the managed
	/// provider first; any remote failure falls through to the local
	/// pipeline and is invisible to the caller beyond latency.
	pub async fn search(&self, req: SearchRequest) -> Result<SearchResponse> {
		if req.namespace.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "namespace must not be empty.".to_string() });
		}
		if req.query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}

		let settings = self.namespaces.resolve(&req.namespace).await?;
		let pipeline = pipeline::resolve_pipeline(
			&req.namespace,
			&settings,
			&req.overrides,
			self.cfg.index.keyword.is_some(),
			self.cfg.providers.remote.is_some(),
		)?;

		self.usage.check_quota(&req.namespace).await?;

		if pipeline.rag_provider == RagProvider::Remote {
			match self.remote_round(&req.query, &pipeline).await {
				Ok(outcome) => {
					self.usage.record_queries(&req.namespace, outcome.response.total_queries);

					return Ok(outcome.response);
				},
				Err(err) => router::log_remote_fallback(&err),
			}
		}

		let round = self.retrieve_round(&req.query, &pipeline).await?;
		let mut state = ResearchState::new();

		state.merge_round(round);

		let response = SearchResponse {
			total_queries: state.total_queries(),
			queries: state.query_log().to_vec(),
			chunks: state.ranked_chunks(),
			provider: "local",
			remote: None,
		};

		self.usage.record_queries(&req.namespace, response.total_queries);

		Ok(response)
	}
}
