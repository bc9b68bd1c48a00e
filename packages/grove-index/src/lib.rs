pub mod qdrant;

mod error;

pub use error::Error;
pub use qdrant::QdrantIndex;

use std::{future::Future, pin::Pin};

use serde_json::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One vector-index hit. `text` comes from the stored payload; `metadata`
/// and `relationships` are only populated when the query asked for them.
#[derive(Debug, Clone)]
pub struct IndexHit {
	pub id: String,
	pub score: f32,
	pub text: String,
	pub metadata: Option<Value>,
	pub relationships: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct IndexQuery {
	pub top_k: u32,
	pub min_score: f32,
	pub filter: Option<Value>,
	pub with_metadata: bool,
	pub with_relationships: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDimensions {
	Exact(u32),
	/// The backend accepts vectors of any width.
	Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmCacheOutcome {
	Warmed,
	Unsupported,
}

/// Dense vector search backend. Implementations must preserve backend
/// result order for equal scores.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn query<'a>(
		&'a self,
		vector: &'a [f32],
		query: &'a IndexQuery,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>>;

	fn dimensions(&self) -> IndexDimensions;

	fn warm_cache(&self) -> BoxFuture<'_, Result<WarmCacheOutcome>>;
}
