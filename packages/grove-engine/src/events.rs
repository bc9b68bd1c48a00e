use grove_domain::{Chunk, QueryRecord};

/// Typed stream events for `/v1/chat`. The transport layer maps each
/// variant to one SSE event; streamed text is never retracted, so a late
/// failure surfaces as a terminal `Error` after whatever was already sent.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum ChatEvent {
	Status(StatusEvent),
	Sources { chunks: Vec<Chunk> },
	Delta { text: String },
	Done { total_queries: u32, queries: Vec<QueryRecord> },
	Error { error_code: String, message: String },
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum StatusEvent {
	GeneratingQueries,
	Searching { queries: Vec<QueryRecord> },
	GeneratingAnswer,
}

impl ChatEvent {
	/// SSE event name for the variant.
	pub fn name(&self) -> &'static str {
		match self {
			Self::Status(_) => "status",
			Self::Sources { .. } => "sources",
			Self::Delta { .. } => "delta",
			Self::Done { .. } => "done",
			Self::Error { .. } => "error",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_stages_serialize_in_kebab_case() {
		let json = serde_json::to_value(StatusEvent::GeneratingQueries).expect("serialize failed");

		assert_eq!(json, serde_json::json!({ "stage": "generating-queries" }));

		let json = serde_json::to_value(StatusEvent::Searching {
			queries: vec![QueryRecord::semantic("refund policy")],
		})
		.expect("serialize failed");

		assert_eq!(
			json,
			serde_json::json!({
				"stage": "searching",
				"queries": [{ "type": "semantic", "query": "refund policy" }]
			})
		);
	}

	#[test]
	fn done_carries_the_query_log() {
		let event = ChatEvent::Done {
			total_queries: 2,
			queries: vec![QueryRecord::semantic("a"), QueryRecord::keyword("b")],
		};
		let json = serde_json::to_value(&event).expect("serialize failed");

		assert_eq!(json["total_queries"], 2);
		assert_eq!(json["queries"][1]["type"], "keyword");
		assert_eq!(event.name(), "done");
	}
}
