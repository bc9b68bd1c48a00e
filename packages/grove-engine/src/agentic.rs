use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove_domain::{ChatTurn, QueryRecord, ResearchState, RetrievalResult};
use grove_providers::llm::{ChatTurn as ModelTurn, LlmDelta, ToolCall};

use crate::{
	ChatEvent, Error, GroveEngine, PipelineConfig, Result, RetrievalMode, StatusEvent, chat,
};

const AGENT_PROMPT: &str = "You answer questions grounded in a document corpus. Use the search \
tool to gather evidence before answering; issue one call per distinct question. When you have \
enough evidence, answer directly, citing the retrieved text. Do not invent sources.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
	Planning,
	Retrieving,
	Answering,
	Done,
}

#[derive(Debug, PartialEq)]
pub enum LoopInput {
	ModelRequestedSearches(Vec<String>),
	ModelAnswered,
	SearchesMerged,
}

#[derive(Debug, PartialEq)]
pub enum NextAction {
	CallModel { allow_tools: bool },
	RunSearches(Vec<String>),
	Finish,
}

/// The loop skeleton as a synchronous step function, so transitions and the
/// step budget are testable without a runtime or model. The async driver
/// owns all I/O and feeds observations back in.
#[derive(Debug)]
pub struct LoopState {
	phase: LoopPhase,
	steps_used: u32,
	max_steps: u32,
}
impl LoopState {
	pub fn new(max_steps: u32) -> Self {
		Self { phase: LoopPhase::Planning, steps_used: 0, max_steps }
	}

	pub fn begin(&self) -> NextAction {
		NextAction::CallModel { allow_tools: self.max_steps > 0 }
	}

	pub fn phase(&self) -> LoopPhase {
		self.phase
	}

	pub fn advance(&mut self, input: LoopInput) -> NextAction {
		match input {
			LoopInput::ModelAnswered => {
				self.phase = LoopPhase::Answering;

				NextAction::Finish
			},
			LoopInput::ModelRequestedSearches(queries) => {
				self.steps_used += 1;

				if queries.is_empty() {
					// Nothing usable came back; give the model another
					// planning turn within the budget.
					self.phase = LoopPhase::Planning;

					NextAction::CallModel { allow_tools: self.steps_used < self.max_steps }
				} else {
					self.phase = LoopPhase::Retrieving;

					NextAction::RunSearches(queries)
				}
			},
			LoopInput::SearchesMerged => {
				self.phase = LoopPhase::Planning;

				NextAction::CallModel { allow_tools: self.steps_used < self.max_steps }
			},
		}
	}

	pub fn complete(&mut self) {
		self.phase = LoopPhase::Done;
	}
}

impl GroveEngine {
	pub(crate) async fn run_agentic(
		&self,
		turns: &[ChatTurn],
		pipeline: &PipelineConfig,
		events: &mpsc::Sender<ChatEvent>,
		cancel: &CancellationToken,
	) -> Result<()> {
		let mut messages = vec![serde_json::json!({ "role": "system", "content": AGENT_PROMPT })];

		messages.extend(chat::render_history(turns));

		let tools = [search_tool()];
		let mut state = LoopState::new(self.cfg.chat.agentic.max_steps);
		let mut research = ResearchState::new();
		let mut pending: Vec<(String, String)> = Vec::new();
		let mut action = state.begin();

		loop {
			match action {
				NextAction::CallModel { allow_tools } => {
					if allow_tools {
						chat::emit(
							events,
							cancel,
							ChatEvent::Status(StatusEvent::GeneratingQueries),
						)
						.await?;
					}

					let active_tools: &[Value] = if allow_tools { &tools } else { &[] };
					let (turn, announced) =
						self.model_turn(&messages, active_tools, &research, events, cancel).await?;

					if turn.tool_calls.is_empty() {
						if !announced && turn.content.trim().is_empty() {
							return Err(Error::Llm {
								message: "Model produced neither an answer nor tool calls."
									.to_string(),
							});
						}

						action = state.advance(LoopInput::ModelAnswered);
					} else {
						if !allow_tools {
							return Err(Error::Llm {
								message: "Model requested searches after the step budget was \
									exhausted."
									.to_string(),
							});
						}

						messages.push(assistant_tool_message(&turn));

						let mut queries = Vec::with_capacity(turn.tool_calls.len());

						for call in &turn.tool_calls {
							match parse_search_call(call) {
								Ok(query) => {
									pending.push((call.id.clone(), query.clone()));
									queries.push(query);
								},
								Err(reason) => {
									tracing::warn!(
										call = %call.name,
										reason,
										"Skipping unusable tool call."
									);
									messages.push(tool_result(&call.id, &reason));
								},
							}
						}

						action = state.advance(LoopInput::ModelRequestedSearches(queries));
					}
				},
				NextAction::RunSearches(queries) => {
					let records = query_records(&queries, pipeline.mode);

					chat::emit(
						events,
						cancel,
						ChatEvent::Status(StatusEvent::Searching { queries: records }),
					)
					.await?;

					for (call_id, query) in pending.drain(..) {
						let round =
							chat::with_cancel(cancel, self.retrieve_round(&query, pipeline))
								.await?;

						messages.push(tool_result(&call_id, &render_round(&round)));
						research.merge_round(round);
					}

					action = state.advance(LoopInput::SearchesMerged);
				},
				NextAction::Finish => {
					state.complete();
					self.usage.record_queries(&pipeline.namespace, research.total_queries());
					chat::emit(events, cancel, ChatEvent::Done {
						total_queries: research.total_queries(),
						queries: research.query_log().to_vec(),
					})
					.await?;

					return Ok(());
				},
			}
		}
	}

	/// Runs one streamed model turn. Without tools on offer the turn can
	/// only be an answer, so a relay task forwards deltas live, announcing
	/// `generating-answer` and the single `sources` event before the first
	/// one. With tools on offer the disposition is unknown until the stream
	/// settles (providers may stream preamble content ahead of the tool-call
	/// delta), so content is held back and flushed only once the turn ends
	/// without tool calls. Returns the finished turn and whether the answer
	/// was announced.
	async fn model_turn(
		&self,
		messages: &[Value],
		tools: &[Value],
		research: &ResearchState,
		events: &mpsc::Sender<ChatEvent>,
		cancel: &CancellationToken,
	) -> Result<(ModelTurn, bool)> {
		let (delta_tx, mut delta_rx) = mpsc::channel::<LlmDelta>(32);
		let relay_events = events.clone();
		let relay_cancel = cancel.clone();
		let tools_offered = !tools.is_empty();
		let sources = research.ranked_chunks();
		let relay_sources = sources.clone();
		let relay = tokio::spawn(async move {
			let mut announced = false;
			let mut tool_turn = false;
			let mut held: Vec<String> = Vec::new();
			let mut sources = Some(relay_sources);

			while let Some(delta) = delta_rx.recv().await {
				match delta {
					LlmDelta::ToolCallStarted => {
						// Content streamed ahead of the tool calls is the
						// model's scratchpad, not the answer.
						tool_turn = true;
						held.clear();
					},
					LlmDelta::Content(text) => {
						if tool_turn {
							continue;
						}
						if tools_offered {
							held.push(text);
							continue;
						}
						if !announced {
							let status =
								ChatEvent::Status(StatusEvent::GeneratingAnswer);

							if chat::emit(&relay_events, &relay_cancel, status).await.is_err() {
								break;
							}

							let chunks = sources.take().unwrap_or_default();

							if chat::emit(&relay_events, &relay_cancel, ChatEvent::Sources {
								chunks,
							})
							.await
							.is_err()
							{
								break;
							}

							announced = true;
						}
						if chat::emit(&relay_events, &relay_cancel, ChatEvent::Delta { text })
							.await
							.is_err()
						{
							break;
						}
					},
				}
			}

			(held, announced)
		});

		// Dropping the transport future on cancellation closes the delta
		// channel, which ends the relay.
		let result = tokio::select! {
			_ = cancel.cancelled() => Err(Error::Cancelled),
			result = self.providers.llm.stream_chat(
				&self.cfg.providers.llm,
				messages,
				tools,
				delta_tx,
			) => result.map_err(|err| {
				if cancel.is_cancelled() {
					Error::Cancelled
				} else {
					Error::Llm { message: err.to_string() }
				}
			}),
		};
		let (held, mut announced) = relay.await.unwrap_or((Vec::new(), false));
		let turn = result?;

		if turn.tool_calls.is_empty() && !held.is_empty() {
			chat::emit(events, cancel, ChatEvent::Status(StatusEvent::GeneratingAnswer)).await?;
			chat::emit(events, cancel, ChatEvent::Sources { chunks: sources }).await?;

			for text in held {
				chat::emit(events, cancel, ChatEvent::Delta { text }).await?;
			}

			announced = true;
		}

		Ok((turn, announced))
	}
}

fn search_tool() -> Value {
	serde_json::json!({
		"type": "function",
		"function": {
			"name": "search",
			"description": "Search the namespace document index.",
			"parameters": {
				"type": "object",
				"properties": {
					"query": {
						"type": "string",
						"description": "A self-contained search query."
					}
				},
				"required": ["query"]
			}
		}
	})
}

fn parse_search_call(call: &ToolCall) -> Result<String, String> {
	#[derive(serde::Deserialize)]
	struct Args {
		query: String,
	}

	if call.name != "search" {
		return Err(format!("Unsupported tool {:?}.", call.name));
	}

	serde_json::from_str::<Args>(&call.arguments)
		.map(|args| args.query)
		.map_err(|_| "Malformed search arguments; expected {\"query\": \"...\"}.".to_string())
}

fn assistant_tool_message(turn: &ModelTurn) -> Value {
	serde_json::json!({
		"role": "assistant",
		"content": turn.content,
		"tool_calls": turn
			.tool_calls
			.iter()
			.map(|call| serde_json::json!({
				"id": call.id,
				"type": "function",
				"function": { "name": call.name, "arguments": call.arguments }
			}))
			.collect::<Vec<_>>(),
	})
}

fn tool_result(call_id: &str, content: &str) -> Value {
	serde_json::json!({ "role": "tool", "tool_call_id": call_id, "content": content })
}

fn render_round(round: &RetrievalResult) -> String {
	let results: Vec<Value> = round
		.results
		.iter()
		.map(|chunk| {
			serde_json::json!({
				"id": chunk.id,
				"score": chunk.effective_score(),
				"text": chunk.text,
			})
		})
		.collect();

	serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn query_records(queries: &[String], mode: RetrievalMode) -> Vec<QueryRecord> {
	queries
		.iter()
		.map(|query| match mode {
			RetrievalMode::Semantic => QueryRecord::semantic(query.as_str()),
			RetrievalMode::Keyword => QueryRecord::keyword(query.as_str()),
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loop_walks_planning_retrieving_answering() {
		let mut state = LoopState::new(3);

		assert_eq!(state.begin(), NextAction::CallModel { allow_tools: true });

		let action =
			state.advance(LoopInput::ModelRequestedSearches(vec!["refund policy".to_string()]));

		assert_eq!(action, NextAction::RunSearches(vec!["refund policy".to_string()]));
		assert_eq!(state.phase(), LoopPhase::Retrieving);

		assert_eq!(
			state.advance(LoopInput::SearchesMerged),
			NextAction::CallModel { allow_tools: true }
		);
		assert_eq!(state.advance(LoopInput::ModelAnswered), NextAction::Finish);
		assert_eq!(state.phase(), LoopPhase::Answering);

		state.complete();
		assert_eq!(state.phase(), LoopPhase::Done);
	}

	#[test]
	fn step_budget_disables_tools() {
		let mut state = LoopState::new(1);

		state.advance(LoopInput::ModelRequestedSearches(vec!["q".to_string()]));

		assert_eq!(
			state.advance(LoopInput::SearchesMerged),
			NextAction::CallModel { allow_tools: false }
		);
	}

	#[test]
	fn empty_search_batch_consumes_a_step() {
		let mut state = LoopState::new(2);

		assert_eq!(
			state.advance(LoopInput::ModelRequestedSearches(Vec::new())),
			NextAction::CallModel { allow_tools: true }
		);
		assert_eq!(
			state.advance(LoopInput::ModelRequestedSearches(Vec::new())),
			NextAction::CallModel { allow_tools: false }
		);
	}

	#[test]
	fn zero_budget_starts_without_tools() {
		let state = LoopState::new(0);

		assert_eq!(state.begin(), NextAction::CallModel { allow_tools: false });
	}

	#[test]
	fn rejects_tool_calls_other_than_search() {
		let call = ToolCall {
			id: "call_1".to_string(),
			name: "delete".to_string(),
			arguments: "{}".to_string(),
		};

		assert!(parse_search_call(&call).is_err());
	}

	#[test]
	fn parses_well_formed_search_arguments() {
		let call = ToolCall {
			id: "call_1".to_string(),
			name: "search".to_string(),
			arguments: "{\"query\": \"refund window\"}".to_string(),
		};

		assert_eq!(parse_search_call(&call).as_deref(), Ok("refund window"));
	}
}
