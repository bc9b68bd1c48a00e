use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use grove_config::Config;

const SAMPLE_CONFIG_TOML: &str = include_str!("../../../grove.example.toml");

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("grove_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.")
}

#[test]
fn sample_config_is_valid() {
	let path = write_temp_config(SAMPLE_CONFIG_TOML.to_string());
	let result = grove_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result.expect("Expected the sample config to be valid.");
}

#[test]
fn rerank_limit_cannot_exceed_top_k() {
	let mut cfg = base_config();

	cfg.retrieval.rerank.limit = Some(cfg.retrieval.top_k + 1);

	let err = grove_config::validate(&cfg).expect_err("Expected rerank limit validation error.");

	assert!(
		err.to_string().contains("retrieval.rerank.limit must not exceed retrieval.top_k."),
		"Unexpected error: {err}"
	);
}

#[test]
fn validation_errors_carry_the_invalid_config_prefix() {
	let mut cfg = base_config();

	cfg.retrieval.top_k = 0;

	let err = grove_config::validate(&cfg).expect_err("Expected top_k validation error.");

	assert!(err.to_string().starts_with("Invalid config: "), "Unexpected error: {err}");
}

#[test]
fn remote_provider_is_required_for_remote_routing() {
	let mut cfg = base_config();

	cfg.retrieval.rag_provider = "remote".to_string();
	cfg.providers.remote = None;

	let err = grove_config::validate(&cfg).expect_err("Expected remote provider validation error.");

	assert!(
		err.to_string()
			.contains("providers.remote is required when retrieval.rag_provider is remote."),
		"Unexpected error: {err}"
	);
}

#[test]
fn rag_provider_must_be_known() {
	let mut cfg = base_config();

	cfg.retrieval.rag_provider = "hybrid".to_string();

	let err = grove_config::validate(&cfg).expect_err("Expected rag_provider validation error.");

	assert!(
		err.to_string().contains("retrieval.rag_provider must be one of local or remote."),
		"Unexpected error: {err}"
	);
}

#[test]
fn embedding_dimensions_must_match_index() {
	let mut cfg = base_config();

	cfg.providers.embedding.dimensions = cfg.index.qdrant.vector_dim + 1;

	let err = grove_config::validate(&cfg).expect_err("Expected dimension validation error.");

	assert!(
		err.to_string()
			.contains("providers.embedding.dimensions must match index.qdrant.vector_dim."),
		"Unexpected error: {err}"
	);
}

#[test]
fn condense_window_is_capped_at_ten_turns() {
	let mut cfg = base_config();

	cfg.chat.condense_max_turns = 11;

	let err = grove_config::validate(&cfg).expect_err("Expected condense window validation error.");

	assert!(
		err.to_string().contains("chat.condense_max_turns must be in the range 1-10."),
		"Unexpected error: {err}"
	);
}

#[test]
fn research_concurrency_is_bounded() {
	let mut cfg = base_config();

	cfg.chat.research.concurrency = 9;

	let err = grove_config::validate(&cfg).expect_err("Expected concurrency validation error.");

	assert!(
		err.to_string().contains("chat.research.concurrency must be in the range 1-8."),
		"Unexpected error: {err}"
	);
}

#[test]
fn namespaces_must_be_listed() {
	let mut cfg = base_config();

	cfg.namespaces.allowed.clear();

	let err = grove_config::validate(&cfg).expect_err("Expected namespaces validation error.");

	assert!(
		err.to_string().contains("namespaces.allowed must be non-empty."),
		"Unexpected error: {err}"
	);
}

#[test]
fn blank_model_route_is_normalized_away() {
	let mut payload = SAMPLE_CONFIG_TOML.to_string();

	payload.push_str(
		"\n[providers.remote]\napi_base = \"https://remote.example\"\napi_key = \"key\"\nmodel_route = \"  \"\n",
	);

	let path = write_temp_config(payload);
	let cfg = grove_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = cfg.expect("Expected config with remote provider to load.");

	assert!(cfg.providers.remote.expect("Remote provider missing.").model_route.is_none());
}
