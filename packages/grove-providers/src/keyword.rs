use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// One lexical (BM25-style) hit from the keyword index.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct KeywordHit {
	pub id: String,
	pub score: f32,
	pub text: String,
	#[serde(default)]
	pub metadata: Option<Value>,
}

pub async fn search(
	cfg: &grove_config::KeywordStoreConfig,
	query: &str,
	limit: u32,
	min_score: f32,
	filter: Option<&Value>,
) -> Result<Vec<KeywordHit>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut body = serde_json::json!({
		"query": query,
		"limit": limit,
		"min_score": min_score,
	});
	if let Some(filter) = filter {
		body["filter"] = filter.clone();
	}
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_keyword_response(json)
}

fn parse_keyword_response(json: Value) -> Result<Vec<KeywordHit>> {
	let results = json
		.get("results")
		.cloned()
		.ok_or_else(|| eyre::eyre!("Keyword response is missing results array."))?;

	serde_json::from_value(results).map_err(|err| eyre::eyre!("Keyword result malformed: {err}."))
}
