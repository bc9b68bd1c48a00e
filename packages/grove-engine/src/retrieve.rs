use grove_domain::{Chunk, QueryRecord, RetrievalResult};
use grove_index::{IndexDimensions, IndexQuery};

use crate::{Error, GroveEngine, PipelineConfig, Result, RetrievalMode};

impl GroveEngine {
	/// One retrieval round: candidates from the keyword store or the vector
	/// index, then an optional rerank pass. The round logs exactly one
	/// `QueryRecord` regardless of how many chunks come back.
	pub(crate) async fn retrieve_round(
		&self,
		query: &str,
		pipeline: &PipelineConfig,
	) -> Result<RetrievalResult> {
		let (mut chunks, record) = match pipeline.mode {
			RetrievalMode::Keyword =>
				(self.keyword_candidates(query, pipeline).await?, QueryRecord::keyword(query)),
			RetrievalMode::Semantic =>
				(self.semantic_candidates(query, pipeline).await?, QueryRecord::semantic(query)),
		};

		if let Some(limit) = pipeline.rerank_limit {
			chunks = self.rerank_candidates(query, chunks, limit as usize).await;
		}

		Ok(RetrievalResult { results: chunks, queries: vec![record] })
	}

	async fn semantic_candidates(
		&self,
		query: &str,
		pipeline: &PipelineConfig,
	) -> Result<Vec<Chunk>> {
		let vectors = self
			.providers
			.embedding
			.embed(&self.cfg.providers.embedding, &[query.to_string()])
			.await
			.map_err(|err| Error::Embedding { message: err.to_string() })?;
		let Some(vector) = vectors.first() else {
			return Err(Error::Embedding {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};

		if let IndexDimensions::Exact(dim) = self.index.dimensions()
			&& vector.len() != dim as usize
		{
			return Err(Error::Embedding {
				message: format!(
					"Embedding width {} does not match index width {dim}.",
					vector.len()
				),
			});
		}

		let index_query = IndexQuery {
			top_k: pipeline.top_k,
			min_score: pipeline.min_score,
			filter: pipeline.filter.clone(),
			with_metadata: pipeline.include_metadata,
			with_relationships: pipeline.include_relationships,
		};
		let hits = self.index.query(vector, &index_query).await?;

		Ok(hits
			.into_iter()
			.map(|hit| Chunk {
				id: hit.id,
				text: hit.text,
				score: hit.score,
				rerank_score: None,
				metadata: hit.metadata,
				relationships: hit.relationships,
			})
			.collect())
	}

	async fn keyword_candidates(
		&self,
		query: &str,
		pipeline: &PipelineConfig,
	) -> Result<Vec<Chunk>> {
		let Some(cfg) = self.cfg.index.keyword.as_ref() else {
			return Err(Error::InvalidRequest {
				message: "Keyword mode requires a configured keyword store.".to_string(),
			});
		};
		let hits = self
			.providers
			.keyword
			.search(cfg, query, pipeline.top_k, pipeline.min_score, pipeline.filter.as_ref())
			.await
			.map_err(|err| Error::Keyword { message: err.to_string() })?;

		Ok(hits
			.into_iter()
			.map(|hit| Chunk {
				id: hit.id,
				text: hit.text,
				score: hit.score,
				rerank_score: None,
				metadata: if pipeline.include_metadata { hit.metadata } else { None },
				relationships: None,
			})
			.collect())
	}

	/// Rerank is best-effort: a failure keeps the retrieval order rather
	/// than failing the round.
	async fn rerank_candidates(&self, query: &str, chunks: Vec<Chunk>, limit: usize) -> Vec<Chunk> {
		if chunks.is_empty() {
			return chunks;
		}

		let docs: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();

		match self.providers.rerank.rerank(&self.cfg.providers.rerank, query, &docs, limit).await {
			Ok(hits) => hits
				.into_iter()
				.map(|hit| {
					let mut chunk = chunks[hit.index].clone();

					chunk.rerank_score = Some(hit.score);

					chunk
				})
				.collect(),
			Err(err) => {
				tracing::warn!(error = %err, "Rerank failed; keeping retrieval order.");

				chunks
			},
		}
	}
}
