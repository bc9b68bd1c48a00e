use std::{collections::BTreeMap, time::Duration};

use color_eyre::{Result, eyre};
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;

/// One tool invocation requested by the model. `arguments` is the raw JSON
/// string exactly as the provider produced it.
#[derive(Debug, Clone)]
pub struct ToolCall {
	pub id: String,
	pub name: String,
	pub arguments: String,
}

/// A completed model turn: free text plus any tool calls it requested.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
	pub content: String,
	pub tool_calls: Vec<ToolCall>,
}

/// Incremental signals forwarded while a turn streams. The consumer uses
/// the first signal to decide whether the turn is an answer or a tool turn.
#[derive(Debug, Clone)]
pub enum LlmDelta {
	Content(String),
	ToolCallStarted,
}

pub async fn generate(cfg: &grove_config::LlmProviderConfig, messages: &[Value]) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_message_content(&json)
}

/// Single-shot structured output call. The caller owns schema validation;
/// a non-JSON payload is an error here, never silently retried.
pub async fn generate_json(
	cfg: &grove_config::LlmProviderConfig,
	messages: &[Value],
) -> Result<Value> {
	let content = generate(cfg, messages).await?;

	serde_json::from_str(strip_code_fence(&content))
		.map_err(|_| eyre::eyre!("Model response is not valid JSON."))
}

/// Streams one chat turn, forwarding content deltas through `delta_tx` as
/// they arrive and accumulating tool-call fragments until the stream ends.
/// A closed receiver aborts the turn, which is how caller-side cancellation
/// propagates into the transport.
pub async fn stream_chat(
	cfg: &grove_config::LlmProviderConfig,
	messages: &[Value],
	tools: &[Value],
	delta_tx: &mpsc::Sender<LlmDelta>,
) -> Result<ChatTurn> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
		"stream": true,
	});
	if !tools.is_empty() {
		body["tools"] = Value::Array(tools.to_vec());
	}
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?
		.error_for_status()?;
	let mut stream = res.bytes_stream();
	let mut decoder = SseLineDecoder::default();
	let mut turn = TurnAccumulator::default();

	'outer: while let Some(chunk) = stream.next().await {
		let chunk = chunk?;

		for line in decoder.push(&chunk) {
			match parse_stream_line(&line)? {
				None => {},
				Some(StreamPayload::Done) => break 'outer,
				Some(StreamPayload::Delta(json)) => {
					let had_tool_calls = !turn.tool_calls.is_empty();
					let fragment = turn.apply_delta(&json);

					if !had_tool_calls && !turn.tool_calls.is_empty() {
						send_delta(delta_tx, LlmDelta::ToolCallStarted).await?;
					}
					if let Some(fragment) = fragment {
						send_delta(delta_tx, LlmDelta::Content(fragment)).await?;
					}
				},
			}
		}
	}

	Ok(turn.finish())
}

async fn send_delta(delta_tx: &mpsc::Sender<LlmDelta>, delta: LlmDelta) -> Result<()> {
	delta_tx
		.send(delta)
		.await
		.map_err(|_| eyre::eyre!("Stream consumer dropped; aborting model turn."))
}

fn parse_message_content(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(|c| c.to_string())
		.ok_or_else(|| eyre::eyre!("Model response is missing message content."))
}

fn strip_code_fence(content: &str) -> &str {
	let trimmed = content.trim();
	let Some(inner) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let inner = inner.strip_prefix("json").unwrap_or(inner);

	inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Splits an SSE byte stream into complete lines, holding partial lines
/// (and partial UTF-8 sequences) across chunk boundaries.
#[derive(Debug, Default)]
struct SseLineDecoder {
	buffer: Vec<u8>,
}
impl SseLineDecoder {
	fn push(&mut self, chunk: &[u8]) -> Vec<String> {
		self.buffer.extend_from_slice(chunk);

		let mut lines = Vec::new();

		while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
			let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();

			line.pop();

			if line.last() == Some(&b'\r') {
				line.pop();
			}

			lines.push(String::from_utf8_lossy(&line).into_owned());
		}

		lines
	}
}

enum StreamPayload {
	Delta(Value),
	Done,
}

fn parse_stream_line(line: &str) -> Result<Option<StreamPayload>> {
	let trimmed = line.trim();

	if trimmed.is_empty() || trimmed.starts_with(':') {
		return Ok(None);
	}

	let Some(data) = trimmed.strip_prefix("data:") else {
		return Ok(None);
	};
	let data = data.trim();

	if data == "[DONE]" {
		return Ok(Some(StreamPayload::Done));
	}

	let json: Value =
		serde_json::from_str(data).map_err(|_| eyre::eyre!("Stream line is not valid JSON."))?;

	Ok(Some(StreamPayload::Delta(json)))
}

#[derive(Debug, Default)]
struct TurnAccumulator {
	content: String,
	tool_calls: BTreeMap<u64, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
	id: String,
	name: String,
	arguments: String,
}

impl TurnAccumulator {
	/// Folds one streamed delta in, returning any content fragment so the
	/// caller can forward it immediately.
	fn apply_delta(&mut self, json: &Value) -> Option<String> {
		let delta = json
			.get("choices")
			.and_then(|v| v.as_array())
			.and_then(|arr| arr.first())
			.and_then(|choice| choice.get("delta"))?;

		if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
			for call in calls {
				let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
				let partial = self.tool_calls.entry(index).or_default();

				if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
					partial.id.push_str(id);
				}
				if let Some(function) = call.get("function") {
					if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
						partial.name.push_str(name);
					}
					if let Some(arguments) = function.get("arguments").and_then(|v| v.as_str()) {
						partial.arguments.push_str(arguments);
					}
				}
			}
		}

		let fragment = delta.get("content").and_then(|v| v.as_str()).filter(|c| !c.is_empty())?;

		self.content.push_str(fragment);

		Some(fragment.to_string())
	}

	fn finish(self) -> ChatTurn {
		let tool_calls = self
			.tool_calls
			.into_values()
			.map(|partial| ToolCall {
				id: partial.id,
				name: partial.name,
				arguments: partial.arguments,
			})
			.collect();

		ChatTurn { content: self.content, tool_calls }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decoder_holds_partial_lines_across_chunks() {
		let mut decoder = SseLineDecoder::default();

		assert!(decoder.push(b"data: {\"a\":").is_empty());

		let lines = decoder.push(b" 1}\r\ndata: [DONE]\n");

		assert_eq!(lines, vec!["data: {\"a\": 1}", "data: [DONE]"]);
	}

	#[test]
	fn stream_line_recognizes_done_and_comments() {
		assert!(matches!(parse_stream_line("data: [DONE]"), Ok(Some(StreamPayload::Done))));
		assert!(matches!(parse_stream_line(": keep-alive"), Ok(None)));
		assert!(matches!(parse_stream_line(""), Ok(None)));
	}

	#[test]
	fn accumulates_tool_call_fragments_by_index() {
		let mut turn = TurnAccumulator::default();

		turn.apply_delta(&serde_json::json!({
			"choices": [{ "delta": { "tool_calls": [
				{ "index": 0, "id": "call_1", "function": { "name": "search", "arguments": "{\"qu" } }
			] } }]
		}));
		turn.apply_delta(&serde_json::json!({
			"choices": [{ "delta": { "tool_calls": [
				{ "index": 0, "function": { "arguments": "ery\": \"refunds\"}" } }
			] } }]
		}));

		let turn = turn.finish();

		assert_eq!(turn.tool_calls.len(), 1);
		assert_eq!(turn.tool_calls[0].name, "search");
		assert_eq!(turn.tool_calls[0].arguments, "{\"query\": \"refunds\"}");
	}

	#[test]
	fn returns_content_fragments_as_they_arrive() {
		let mut turn = TurnAccumulator::default();
		let fragment = turn.apply_delta(&serde_json::json!({
			"choices": [{ "delta": { "content": "Hello" } }]
		}));

		assert_eq!(fragment.as_deref(), Some("Hello"));
		assert_eq!(turn.finish().content, "Hello");
	}

	#[test]
	fn strips_json_code_fences() {
		assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
		assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
	}

	#[test]
	fn parses_message_content() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "An answer." } }]
		});
		assert_eq!(parse_message_content(&json).expect("parse failed"), "An answer.");
	}
}
