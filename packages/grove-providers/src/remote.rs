use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// Answer payload from the managed search provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RemoteAnswer {
	pub answer: String,
	#[serde(default)]
	pub sources: Vec<RemoteSource>,
	#[serde(default)]
	pub metadata: Option<RemoteCallMetadata>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RemoteSource {
	pub idx: u64,
	pub score: f32,
	#[serde(default)]
	pub metadata: Option<Value>,
	#[serde(default)]
	pub preview: String,
	#[serde(default)]
	pub url: Option<String>,
}

/// Opaque observability annotations; never used for control flow.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RemoteCallMetadata {
	#[serde(default)]
	pub model: Option<String>,
	#[serde(default)]
	pub tokens: Option<u64>,
	#[serde(default)]
	pub cached: Option<bool>,
	#[serde(default)]
	pub latency: Option<u64>,
}

/// Raised when the provider answered 2xx but the payload does not match
/// the contract. The router treats this differently from transport errors.
pub const CONTRACT_MISMATCH: &str = "Remote provider contract mismatch";

/// One managed-provider search call. Timeouts and connect failures are
/// retried once; the call is an idempotent read. Any other failure surfaces
/// immediately so the router can fall back.
pub async fn search(
	cfg: &grove_config::RemoteProviderConfig,
	query: &str,
	filters: Option<&Value>,
	mode: &str,
) -> Result<RemoteAnswer> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.search_path);
	let mut body = serde_json::json!({
		"query": query,
		"mode": mode,
		"safety": "standard",
	});
	if let Some(filters) = filters {
		body["filters"] = filters.clone();
	}
	if let Some(route) = cfg.model_route.as_deref() {
		body["modelRoute"] = Value::from(route);
	}
	if let Some(max_tokens) = cfg.max_tokens {
		body["max_tokens"] = Value::from(max_tokens);
	}

	let mut attempts = 0;
	let res = loop {
		attempts += 1;

		let request = client
			.post(&url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body);

		match request.send().await {
			Ok(res) => break res,
			Err(err) if attempts < 2 && (err.is_timeout() || err.is_connect()) => continue,
			Err(err) => return Err(err.into()),
		}
	};
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(json)
}

pub async fn health(cfg: &grove_config::RemoteProviderConfig) -> Result<()> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.health_path);

	client
		.get(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.send()
		.await?
		.error_for_status()?;

	Ok(())
}

fn parse_search_response(json: Value) -> Result<RemoteAnswer> {
	serde_json::from_value(json).map_err(|err| eyre::eyre!("{CONTRACT_MISMATCH}: {err}."))
}
