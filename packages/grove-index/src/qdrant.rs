use qdrant_client::qdrant::{
	Condition, Filter, Query, QueryPointsBuilder, ScoredPoint, Value, point_id::PointIdOptions,
	value::Kind,
};
use serde_json::{Map, Value as JsonValue};

use crate::{
	BoxFuture, Error, IndexDimensions, IndexHit, IndexQuery, Result, VectorIndex, WarmCacheOutcome,
};

pub const DENSE_VECTOR_NAME: &str = "dense";

pub struct QdrantIndex {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantIndex {
	pub fn new(cfg: &grove_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	async fn run_query(&self, vector: &[f32], query: &IndexQuery) -> Result<Vec<IndexHit>> {
		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.using(DENSE_VECTOR_NAME)
			.limit(query.top_k as u64)
			.with_payload(true);

		if query.min_score > 0.0 {
			search = search.score_threshold(query.min_score);
		}
		if let Some(filter) = query.filter.as_ref() {
			search = search.filter(build_filter(filter)?);
		}

		let response = self.client.query(search).await?;

		Ok(response
			.result
			.into_iter()
			.map(|point| hit_from_point(point, query.with_metadata, query.with_relationships))
			.collect())
	}
}

impl VectorIndex for QdrantIndex {
	fn query<'a>(
		&'a self,
		vector: &'a [f32],
		query: &'a IndexQuery,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		Box::pin(self.run_query(vector, query))
	}

	fn dimensions(&self) -> IndexDimensions {
		IndexDimensions::Exact(self.vector_dim)
	}

	fn warm_cache(&self) -> BoxFuture<'_, Result<WarmCacheOutcome>> {
		Box::pin(async {
			self.client.collection_info(self.collection.clone()).await?;

			Ok(WarmCacheOutcome::Warmed)
		})
	}
}

/// Translates a flat JSON object of equality constraints into a Qdrant
/// filter. Nested objects and arrays are rejected rather than guessed at.
fn build_filter(filter: &JsonValue) -> Result<Filter> {
	let Some(map) = filter.as_object() else {
		return Err(Error::InvalidFilter("Filter must be a JSON object.".to_string()));
	};

	let mut must = Vec::with_capacity(map.len());

	for (key, value) in map {
		let condition = match value {
			JsonValue::String(text) => Condition::matches(key.as_str(), text.clone()),
			JsonValue::Bool(flag) => Condition::matches(key.as_str(), *flag),
			JsonValue::Number(number) => match number.as_i64() {
				Some(int) => Condition::matches(key.as_str(), int),
				None => {
					return Err(Error::InvalidFilter(format!(
						"Filter key {key:?} must be an integer, string, or boolean."
					)));
				},
			},
			_ => {
				return Err(Error::InvalidFilter(format!(
					"Filter key {key:?} must be a scalar value."
				)));
			},
		};

		must.push(condition);
	}

	Ok(Filter { must, ..Default::default() })
}

fn hit_from_point(point: ScoredPoint, with_metadata: bool, with_relationships: bool) -> IndexHit {
	let id = point
		.id
		.and_then(|id| id.point_id_options)
		.map(|options| match options {
			PointIdOptions::Uuid(uuid) => uuid,
			PointIdOptions::Num(num) => num.to_string(),
		})
		.unwrap_or_default();
	let mut payload = point.payload;
	let text = payload
		.remove("text")
		.and_then(|value| match value.kind {
			Some(Kind::StringValue(text)) => Some(text),
			_ => None,
		})
		.unwrap_or_default();
	let metadata =
		if with_metadata { payload.remove("metadata").map(value_to_json) } else { None };
	let relationships = if with_relationships {
		payload.remove("relationships").map(value_to_json)
	} else {
		None
	};

	IndexHit { id, score: point.score, text, metadata, relationships }
}

fn value_to_json(value: Value) -> JsonValue {
	match value.kind {
		None | Some(Kind::NullValue(_)) => JsonValue::Null,
		Some(Kind::BoolValue(flag)) => JsonValue::Bool(flag),
		Some(Kind::IntegerValue(int)) => JsonValue::from(int),
		Some(Kind::DoubleValue(double)) => JsonValue::from(double),
		Some(Kind::StringValue(text)) => JsonValue::String(text),
		Some(Kind::ListValue(list)) =>
			JsonValue::Array(list.values.into_iter().map(value_to_json).collect()),
		Some(Kind::StructValue(object)) => JsonValue::Object(
			object
				.fields
				.into_iter()
				.map(|(key, value)| (key, value_to_json(value)))
				.collect::<Map<String, JsonValue>>(),
		),
	}
}
