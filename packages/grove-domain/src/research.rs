use ahash::AHashMap;

use crate::chunk::{Chunk, QueryRecord, RetrievalResult};

/// Request-scoped aggregate shared by the agentic loop and the deep
/// research pipeline. `chunks` is the deduplication authority: a chunk id
/// seen across rounds survives with the highest effective score observed.
#[derive(Debug, Default)]
pub struct ResearchState {
	chunks: AHashMap<String, StoredChunk>,
	total_queries: u32,
	query_log: Vec<QueryRecord>,
	arrivals: u64,
}

#[derive(Debug)]
struct StoredChunk {
	chunk: Chunk,
	arrival: u64,
}

impl ResearchState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Folds one retrieval round into the aggregate. Increments the query
	/// count by the number of retrieval calls logged in the round, never by
	/// the number of chunks.
	pub fn merge_round(&mut self, round: RetrievalResult) {
		self.total_queries += round.queries.len() as u32;
		self.query_log.extend(round.queries);

		for chunk in round.results {
			self.merge_chunk(chunk);
		}
	}

	fn merge_chunk(&mut self, chunk: Chunk) {
		match self.chunks.get_mut(&chunk.id) {
			Some(existing) => {
				// Equal scores keep the earlier arrival.
				if chunk.effective_score() > existing.chunk.effective_score() {
					existing.chunk = chunk;
				}
			},
			None => {
				let arrival = self.arrivals;

				self.arrivals += 1;
				self.chunks.insert(chunk.id.clone(), StoredChunk { chunk, arrival });
			},
		}
	}

	pub fn total_queries(&self) -> u32 {
		self.total_queries
	}

	pub fn query_log(&self) -> &[QueryRecord] {
		&self.query_log
	}

	pub fn chunk(&self, id: &str) -> Option<&Chunk> {
		self.chunks.get(id).map(|stored| &stored.chunk)
	}

	pub fn is_empty(&self) -> bool {
		self.chunks.is_empty()
	}

	/// Deduplicated chunks sorted by descending effective score. The sort
	/// is stable over arrival order, so equal scores preserve the order the
	/// backend returned them in.
	pub fn ranked_chunks(&self) -> Vec<Chunk> {
		let mut stored: Vec<&StoredChunk> = self.chunks.values().collect();

		stored.sort_by_key(|item| item.arrival);
		stored.sort_by(|a, b| {
			b.chunk.effective_score().total_cmp(&a.chunk.effective_score())
		});

		stored.into_iter().map(|item| item.chunk.clone()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chunk(id: &str, score: f32) -> Chunk {
		Chunk {
			id: id.to_string(),
			text: format!("text {id}"),
			score,
			rerank_score: None,
			metadata: None,
			relationships: None,
		}
	}

	#[test]
	fn collision_keeps_highest_score() {
		let mut state = ResearchState::new();

		state.merge_round(RetrievalResult {
			results: vec![chunk("a", 0.4)],
			queries: vec![QueryRecord::semantic("q1")],
		});
		state.merge_round(RetrievalResult {
			results: vec![chunk("a", 0.9)],
			queries: vec![QueryRecord::semantic("q2")],
		});

		assert_eq!(state.total_queries(), 2);
		assert_eq!(state.chunk("a").map(|c| c.score), Some(0.9));
	}

	#[test]
	fn equal_scores_preserve_arrival_order() {
		let mut state = ResearchState::new();

		state.merge_round(RetrievalResult {
			results: vec![chunk("first", 0.5), chunk("second", 0.5)],
			queries: vec![QueryRecord::semantic("q")],
		});

		let ranked = state.ranked_chunks();

		assert_eq!(ranked[0].id, "first");
		assert_eq!(ranked[1].id, "second");
	}
}
