use std::sync::Arc;

use grove_engine::GroveEngine;
use grove_index::QdrantIndex;

#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<GroveEngine>,
}
impl AppState {
	pub fn new(config: grove_config::Config) -> color_eyre::Result<Self> {
		let index = Arc::new(QdrantIndex::new(&config.index.qdrant)?);

		Ok(Self { engine: Arc::new(GroveEngine::new(config, index)) })
	}

	/// Test seam: wraps a pre-built engine, fakes and all.
	pub fn with_engine(engine: GroveEngine) -> Self {
		Self { engine: Arc::new(engine) }
	}
}
