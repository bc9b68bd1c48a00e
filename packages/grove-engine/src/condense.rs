use std::fmt::Write;

use grove_domain::{ChatRole, ChatTurn};

use crate::{Error, GroveEngine, Result};

const CONDENSE_PROMPT: &str = "You rewrite the latest message of a conversation into one \
self-contained search query. Resolve pronouns and references against the prior turns. Reply \
with the rewritten query only, no preamble and no quotes.";

impl GroveEngine {
	/// Collapses the conversation into a single self-contained query. A
	/// first message passes through verbatim. One model call, no retries;
	/// failure fails the request.
	pub(crate) async fn condense_query(&self, turns: &[ChatTurn]) -> Result<String> {
		let Some((latest, history)) = turns.split_last() else {
			return Err(Error::InvalidRequest { message: "messages must not be empty.".to_string() });
		};

		if history.is_empty() {
			return Ok(latest.content.clone());
		}

		let window_len = self.cfg.chat.condense_max_turns as usize;
		let window = &history[history.len().saturating_sub(window_len)..];
		let messages = [
			serde_json::json!({ "role": "system", "content": CONDENSE_PROMPT }),
			serde_json::json!({
				"role": "user",
				"content": render_transcript(window, &latest.content),
			}),
		];
		let condensed = self
			.providers
			.llm
			.generate(&self.cfg.providers.llm, &messages)
			.await
			.map_err(|err| Error::Llm { message: err.to_string() })?;
		let condensed = condensed.trim();

		if condensed.is_empty() {
			return Err(Error::Llm { message: "Condensed query is empty.".to_string() });
		}

		Ok(condensed.to_string())
	}
}

fn render_transcript(window: &[ChatTurn], latest: &str) -> String {
	let mut transcript = String::new();

	for turn in window {
		let speaker = match turn.role {
			ChatRole::User => "User",
			ChatRole::Assistant => "Assistant",
		};

		let _ = writeln!(transcript, "{speaker}: {}", turn.content);
	}

	let _ = write!(transcript, "\nNew message: {latest}");

	transcript
}
