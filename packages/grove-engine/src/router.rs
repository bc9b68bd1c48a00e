use std::time::Instant;

use serde_json::{Map, Value};

use grove_domain::{Chunk, QueryRecord};
use grove_providers::remote::CONTRACT_MISMATCH;

use crate::{
	Error, GroveEngine, PipelineConfig, Result, RetrievalMode,
	search::{RemoteMeta, SearchResponse},
};

/// A successful managed-provider call, already translated into the local
/// envelope. The remote answer text only matters on the chat path.
pub(crate) struct RemoteOutcome {
	pub(crate) answer: String,
	pub(crate) response: SearchResponse,
}

impl GroveEngine {
	/// One managed-provider round. Any failure here is absorbed by the
	/// caller, which falls through to the local pipeline.
	pub(crate) async fn remote_round(
		&self,
		query: &str,
		pipeline: &PipelineConfig,
	) -> Result<RemoteOutcome> {
		let Some(cfg) = self.cfg.providers.remote.as_ref() else {
			return Err(Error::Internal {
				message: "Namespace routes to the remote provider but none is configured."
					.to_string(),
			});
		};
		let mode = match pipeline.mode {
			RetrievalMode::Semantic => "semantic",
			RetrievalMode::Keyword => "keyword",
		};
		let started = Instant::now();
		let answer = self
			.providers
			.remote
			.search(cfg, query, pipeline.filter.as_ref(), mode)
			.await
			.map_err(|err| Error::Remote { message: err.to_string() })?;
		let latency_ms = started.elapsed().as_millis() as u64;

		let chunks = answer
			.sources
			.into_iter()
			.map(|source| Chunk {
				id: format!("remote-{}", source.idx),
				text: source.preview,
				score: source.score,
				rerank_score: None,
				metadata: if pipeline.include_metadata {
					merge_source_metadata(source.metadata, source.url)
				} else {
					None
				},
				relationships: None,
			})
			.collect();
		let meta = answer.metadata.unwrap_or_default();
		let response = SearchResponse {
			total_queries: 1,
			queries: vec![QueryRecord::semantic(query)],
			chunks,
			provider: "remote",
			remote: Some(RemoteMeta {
				latency_ms,
				cached: meta.cached.unwrap_or(false),
				model: meta.model,
			}),
		};

		Ok(RemoteOutcome { answer: answer.answer, response })
	}
}

/// Contract mismatches are logged at error level so a drifting provider
/// surfaces in monitoring; the caller still sees only the local result.
pub(crate) fn log_remote_fallback(err: &Error) {
	if err.to_string().contains(CONTRACT_MISMATCH) {
		tracing::error!(error = %err, reason = "contract_mismatch", "Remote provider payload did not match the contract; falling back to local retrieval.");
	} else {
		tracing::warn!(error = %err, "Remote provider failed; falling back to local retrieval.");
	}
}

fn merge_source_metadata(metadata: Option<Value>, url: Option<String>) -> Option<Value> {
	let mut map = match metadata {
		Some(Value::Object(map)) => map,
		Some(other) => {
			let mut map = Map::new();

			map.insert("value".to_string(), other);

			map
		},
		None => Map::new(),
	};

	if let Some(url) = url {
		map.entry("url".to_string()).or_insert(Value::String(url));
	}

	if map.is_empty() { None } else { Some(Value::Object(map)) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn source_url_lands_in_metadata() {
		let merged = merge_source_metadata(
			Some(serde_json::json!({ "title": "Refunds" })),
			Some("https://docs/a".to_string()),
		)
		.expect("Expected metadata.");

		assert_eq!(merged["title"], "Refunds");
		assert_eq!(merged["url"], "https://docs/a");
	}

	#[test]
	fn empty_source_metadata_stays_absent() {
		assert!(merge_source_metadata(None, None).is_none());
	}
}
