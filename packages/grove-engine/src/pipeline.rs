use std::{
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use ahash::AHashMap;
use serde_json::Value;

use crate::{BoxFuture, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagProvider {
	Local,
	Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
	Semantic,
	Keyword,
}

/// Retrieval defaults for one namespace, as served by the backing store.
#[derive(Debug, Clone)]
pub struct NamespaceSettings {
	pub rag_provider: RagProvider,
	pub top_k: u32,
	pub min_score: f32,
	pub rerank_enabled: bool,
	pub rerank_limit: Option<u32>,
	pub include_metadata: bool,
	pub include_relationships: bool,
}

pub trait NamespaceStore
where
	Self: Send + Sync,
{
	fn fetch<'a>(
		&'a self,
		namespace: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Option<NamespaceSettings>>>;
}

/// Store backed by the `[namespaces]` and `[retrieval]` config sections.
/// Every allowed namespace shares the configured retrieval defaults.
pub struct ConfigNamespaceStore {
	allowed: Vec<String>,
	settings: NamespaceSettings,
}
impl ConfigNamespaceStore {
	pub fn from_config(cfg: &grove_config::Config) -> Self {
		let retrieval = &cfg.retrieval;
		let rag_provider = match retrieval.rag_provider.as_str() {
			"remote" => RagProvider::Remote,
			_ => RagProvider::Local,
		};

		Self {
			allowed: cfg.namespaces.allowed.clone(),
			settings: NamespaceSettings {
				rag_provider,
				top_k: retrieval.top_k,
				min_score: retrieval.min_score,
				rerank_enabled: retrieval.rerank.enabled,
				rerank_limit: retrieval.rerank.limit,
				include_metadata: retrieval.include_metadata,
				include_relationships: retrieval.include_relationships,
			},
		}
	}
}
impl NamespaceStore for ConfigNamespaceStore {
	fn fetch<'a>(
		&'a self,
		namespace: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<Option<NamespaceSettings>>> {
		Box::pin(async move {
			Ok(self
				.allowed
				.iter()
				.any(|allowed| allowed == namespace)
				.then(|| self.settings.clone()))
		})
	}
}

struct CacheEntry {
	settings: NamespaceSettings,
	fetched_at: Instant,
}

/// TTL cache in front of the namespace store. Entries are refreshed lazily;
/// a store failure never evicts a still-fresh entry because stale entries
/// are dropped before the fetch.
pub struct NamespaceCache {
	store: Arc<dyn NamespaceStore>,
	ttl: Duration,
	entries: Mutex<AHashMap<String, CacheEntry>>,
}
impl NamespaceCache {
	pub fn new(store: Arc<dyn NamespaceStore>, ttl: Duration) -> Self {
		Self { store, ttl, entries: Mutex::new(AHashMap::new()) }
	}

	pub async fn resolve(&self, namespace: &str) -> Result<NamespaceSettings> {
		{
			let entries = self.entries.lock().expect("namespace cache poisoned");

			if let Some(entry) = entries.get(namespace)
				&& entry.fetched_at.elapsed() < self.ttl
			{
				return Ok(entry.settings.clone());
			}
		}

		let fetched = self
			.store
			.fetch(namespace)
			.await
			.map_err(|err| Error::Internal { message: err.to_string() })?;
		let Some(settings) = fetched else {
			return Err(Error::NotFound { message: format!("Unknown namespace {namespace:?}.") });
		};

		self.entries.lock().expect("namespace cache poisoned").insert(
			namespace.to_string(),
			CacheEntry { settings: settings.clone(), fetched_at: Instant::now() },
		);

		Ok(settings)
	}
}

/// Per-request override surface shared by the search and chat endpoints.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RetrievalOverrides {
	pub mode: Option<String>,
	pub top_k: Option<u32>,
	pub min_score: Option<f32>,
	pub rerank: Option<bool>,
	pub rerank_limit: Option<u32>,
	pub filter: Option<Value>,
	pub include_metadata: Option<bool>,
	pub include_relationships: Option<bool>,
}

/// Immutable retrieval plan for one request. Built exactly once, before any
/// provider call, so every validation failure is a clean `InvalidRequest`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub namespace: String,
	pub rag_provider: RagProvider,
	pub mode: RetrievalMode,
	pub top_k: u32,
	pub min_score: f32,
	/// `None` disables reranking for the request.
	pub rerank_limit: Option<u32>,
	pub filter: Option<Value>,
	pub include_metadata: bool,
	pub include_relationships: bool,
}

pub(crate) fn resolve_pipeline(
	namespace: &str,
	settings: &NamespaceSettings,
	overrides: &RetrievalOverrides,
	has_keyword_store: bool,
	has_remote_provider: bool,
) -> Result<PipelineConfig> {
	let mode = match overrides.mode.as_deref() {
		None | Some("semantic") => RetrievalMode::Semantic,
		Some("keyword") => RetrievalMode::Keyword,
		Some(other) => {
			return Err(Error::InvalidRequest {
				message: format!("Unknown retrieval mode {other:?}."),
			});
		},
	};

	if mode == RetrievalMode::Keyword && !has_keyword_store {
		return Err(Error::InvalidRequest {
			message: "Keyword mode requires a configured keyword store.".to_string(),
		});
	}

	let rag_provider = settings.rag_provider;

	if rag_provider == RagProvider::Remote && !has_remote_provider {
		return Err(Error::Internal {
			message: "Namespace routes to the remote provider but none is configured.".to_string(),
		});
	}

	let top_k = overrides.top_k.unwrap_or(settings.top_k);

	if top_k == 0 {
		return Err(Error::InvalidRequest { message: "top_k must be at least 1.".to_string() });
	}

	let min_score = overrides.min_score.unwrap_or(settings.min_score);

	if !(0.0..=1.0).contains(&min_score) && mode == RetrievalMode::Semantic {
		return Err(Error::InvalidRequest {
			message: "min_score must be within [0.0, 1.0] for semantic retrieval.".to_string(),
		});
	}

	let rerank_enabled = overrides.rerank.unwrap_or(settings.rerank_enabled);
	let rerank_limit = if rerank_enabled {
		let limit = overrides.rerank_limit.or(settings.rerank_limit).unwrap_or(top_k);

		if limit == 0 {
			return Err(Error::InvalidRequest {
				message: "rerank_limit must be at least 1.".to_string(),
			});
		}
		if limit > top_k {
			return Err(Error::InvalidRequest {
				message: format!("rerank_limit {limit} must not exceed top_k {top_k}."),
			});
		}

		Some(limit)
	} else {
		None
	};

	Ok(PipelineConfig {
		namespace: namespace.to_string(),
		rag_provider,
		mode,
		top_k,
		min_score,
		rerank_limit,
		filter: overrides.filter.clone(),
		include_metadata: overrides.include_metadata.unwrap_or(settings.include_metadata),
		include_relationships: overrides
			.include_relationships
			.unwrap_or(settings.include_relationships),
	})
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	fn settings() -> NamespaceSettings {
		NamespaceSettings {
			rag_provider: RagProvider::Local,
			top_k: 10,
			min_score: 0.2,
			rerank_enabled: true,
			rerank_limit: Some(5),
			include_metadata: false,
			include_relationships: false,
		}
	}

	#[test]
	fn rerank_limit_must_not_exceed_top_k() {
		let overrides = RetrievalOverrides { rerank_limit: Some(11), ..Default::default() };
		let err = resolve_pipeline("docs", &settings(), &overrides, false, false)
			.expect_err("Expected rejection.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}

	#[test]
	fn rerank_limit_defaults_to_namespace_settings() {
		let pipeline =
			resolve_pipeline("docs", &settings(), &RetrievalOverrides::default(), false, false)
				.expect("resolve failed");

		assert_eq!(pipeline.rerank_limit, Some(5));
		assert_eq!(pipeline.top_k, 10);
	}

	#[test]
	fn disabling_rerank_clears_the_limit() {
		let overrides = RetrievalOverrides { rerank: Some(false), ..Default::default() };
		let pipeline = resolve_pipeline("docs", &settings(), &overrides, false, false)
			.expect("resolve failed");

		assert_eq!(pipeline.rerank_limit, None);
	}

	#[test]
	fn keyword_mode_without_store_is_rejected() {
		let overrides =
			RetrievalOverrides { mode: Some("keyword".to_string()), ..Default::default() };
		let err = resolve_pipeline("docs", &settings(), &overrides, false, false)
			.expect_err("Expected rejection.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}

	struct CountingStore {
		fetches: AtomicU32,
	}
	impl NamespaceStore for CountingStore {
		fn fetch<'a>(
			&'a self,
			namespace: &'a str,
		) -> BoxFuture<'a, color_eyre::Result<Option<NamespaceSettings>>> {
			Box::pin(async move {
				self.fetches.fetch_add(1, Ordering::SeqCst);

				Ok((namespace == "docs").then(settings))
			})
		}
	}

	#[tokio::test]
	async fn cache_serves_fresh_entries_without_refetching() {
		let store = Arc::new(CountingStore { fetches: AtomicU32::new(0) });
		let cache = NamespaceCache::new(store.clone(), Duration::from_secs(300));

		cache.resolve("docs").await.expect("resolve failed");
		cache.resolve("docs").await.expect("resolve failed");

		assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn zero_ttl_refetches_every_time() {
		let store = Arc::new(CountingStore { fetches: AtomicU32::new(0) });
		let cache = NamespaceCache::new(store.clone(), Duration::ZERO);

		cache.resolve("docs").await.expect("resolve failed");
		cache.resolve("docs").await.expect("resolve failed");

		assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn unknown_namespace_is_not_found() {
		let store = Arc::new(CountingStore { fetches: AtomicU32::new(0) });
		let cache = NamespaceCache::new(store, Duration::from_secs(300));
		let err = cache.resolve("nope").await.expect_err("Expected rejection.");

		assert!(matches!(err, Error::NotFound { .. }));
	}
}
