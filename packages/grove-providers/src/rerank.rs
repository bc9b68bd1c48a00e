// std
use std::time::Duration as StdDuration;

// crates.io
use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct RerankHit {
	/// Position of the document in the candidate slice that was sent.
	pub index: usize,
	pub score: f32,
}

/// Second-pass relevance scoring. Returns at most `limit` hits ordered by
/// descending relevance, each pointing back into `docs`.
pub async fn rerank(
	cfg: &grove_config::RerankProviderConfig,
	query: &str,
	docs: &[String],
	limit: usize,
) -> Result<Vec<RerankHit>> {
	let client = Client::builder().timeout(StdDuration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"documents": docs,
		"top_n": limit,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	parse_rerank_response(json, docs.len(), limit)
}

fn parse_rerank_response(json: Value, doc_count: usize, limit: usize) -> Result<Vec<RerankHit>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| eyre::eyre!("Rerank response is missing results array."))?;

	let mut hits = Vec::with_capacity(results.len().min(limit));
	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| eyre::eyre!("Rerank result missing index."))? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| eyre::eyre!("Rerank result missing score."))? as f32;
		if index >= doc_count {
			return Err(eyre::eyre!("Rerank result index {index} is out of range."));
		}
		hits.push(RerankHit { index, score });
	}

	hits.sort_by(|a, b| b.score.total_cmp(&a.score));
	hits.truncate(limit);

	Ok(hits)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn orders_hits_by_score_and_truncates() {
		let json = serde_json::json!({
			"results": [
				{ "index": 1, "relevance_score": 0.2 },
				{ "index": 0, "relevance_score": 0.9 },
				{ "index": 2, "relevance_score": 0.5 }
			]
		});
		let hits = parse_rerank_response(json, 3, 2).expect("parse failed");
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].index, 0);
		assert_eq!(hits[1].index, 2);
	}

	#[test]
	fn rejects_out_of_range_index() {
		let json = serde_json::json!({
			"results": [{ "index": 5, "relevance_score": 0.2 }]
		});
		assert!(parse_rerank_response(json, 2, 2).is_err());
	}
}
