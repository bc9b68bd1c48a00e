mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Agentic, Chat, Config, EmbeddingProviderConfig, Index, KeywordStoreConfig, LlmProviderConfig,
	Namespaces, Providers, Qdrant, RemoteProviderConfig, RerankProviderConfig, RerankSettings,
	Research, Retrieval, Service, Usage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::Parse { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::validation("service.http_bind must be non-empty."));
	}
	if cfg.index.qdrant.vector_dim == 0 {
		return Err(Error::validation("index.qdrant.vector_dim must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.index.qdrant.vector_dim {
		return Err(Error::validation(
			"providers.embedding.dimensions must match index.qdrant.vector_dim.",
		));
	}
	if cfg.retrieval.top_k == 0 {
		return Err(Error::validation("retrieval.top_k must be greater than zero."));
	}
	if !cfg.retrieval.min_score.is_finite() || cfg.retrieval.min_score < 0.0 {
		return Err(Error::validation(
			"retrieval.min_score must be a finite number, zero or greater.",
		));
	}
	if let Some(limit) = cfg.retrieval.rerank.limit {
		if limit == 0 {
			return Err(Error::validation("retrieval.rerank.limit must be greater than zero."));
		}
		if limit > cfg.retrieval.top_k {
			return Err(Error::validation(
				"retrieval.rerank.limit must not exceed retrieval.top_k.",
			));
		}
	}

	match cfg.retrieval.rag_provider.as_str() {
		"local" => {},
		"remote" =>
			if cfg.providers.remote.is_none() {
				return Err(Error::validation(
					"providers.remote is required when retrieval.rag_provider is remote.",
				));
			},
		_ => {
			return Err(Error::validation(
				"retrieval.rag_provider must be one of local or remote.",
			));
		},
	}

	if cfg.chat.condense_max_turns == 0 || cfg.chat.condense_max_turns > 10 {
		return Err(Error::validation("chat.condense_max_turns must be in the range 1-10."));
	}
	if cfg.chat.agentic.max_steps == 0 {
		return Err(Error::validation("chat.agentic.max_steps must be greater than zero."));
	}
	if cfg.chat.research.max_sub_questions == 0 {
		return Err(Error::validation(
			"chat.research.max_sub_questions must be greater than zero.",
		));
	}
	if cfg.chat.research.concurrency == 0 || cfg.chat.research.concurrency > 8 {
		return Err(Error::validation("chat.research.concurrency must be in the range 1-8."));
	}

	if cfg.namespaces.allowed.is_empty() {
		return Err(Error::validation("namespaces.allowed must be non-empty."));
	}
	if cfg.namespaces.allowed.iter().any(|namespace| namespace.trim().is_empty()) {
		return Err(Error::validation("namespaces.allowed entries cannot be blank."));
	}
	if cfg.namespaces.cache_ttl_seconds == 0 {
		return Err(Error::validation("namespaces.cache_ttl_seconds must be greater than zero."));
	}

	if let Some(ceiling) = cfg.usage.query_ceiling
		&& ceiling == 0
	{
		return Err(Error::validation("usage.query_ceiling must be greater than zero."));
	}

	for (label, key, timeout_ms) in [
		("embedding", &cfg.providers.embedding.api_key, cfg.providers.embedding.timeout_ms),
		("rerank", &cfg.providers.rerank.api_key, cfg.providers.rerank.timeout_ms),
		("llm", &cfg.providers.llm.api_key, cfg.providers.llm.timeout_ms),
	] {
		if key.trim().is_empty() {
			return Err(Error::validation(format!("Provider {label} api_key must be non-empty.")));
		}
		if timeout_ms == 0 {
			return Err(Error::validation(format!(
				"Provider {label} timeout_ms must be greater than zero."
			)));
		}
	}

	if let Some(remote) = cfg.providers.remote.as_ref() {
		if remote.api_key.trim().is_empty() {
			return Err(Error::validation("providers.remote.api_key must be non-empty."));
		}
		if remote.timeout_ms == 0 {
			return Err(Error::validation(
				"providers.remote.timeout_ms must be greater than zero.",
			));
		}
	}
	if let Some(keyword) = cfg.index.keyword.as_ref()
		&& keyword.timeout_ms == 0
	{
		return Err(Error::validation("index.keyword.timeout_ms must be greater than zero."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg
		.providers
		.embedding
		.query_input_type
		.as_deref()
		.map(|value| value.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.providers.embedding.query_input_type = None;
	}
	if let Some(remote) = cfg.providers.remote.as_mut()
		&& remote.model_route.as_deref().map(|route| route.trim().is_empty()).unwrap_or(false)
	{
		remote.model_route = None;
	}
}
