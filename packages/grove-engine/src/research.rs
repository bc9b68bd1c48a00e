use std::fmt::Write;

use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove_domain::{ResearchState, RetrievalResult};
use grove_providers::llm::LlmDelta;

use crate::{
	ChatEvent, Error, GroveEngine, PipelineConfig, Result, StatusEvent, agentic, chat,
};

const PLAN_PROMPT: &str = "You decompose a research question into independent sub-questions that \
can each be answered from a document corpus. Reply with JSON only, shaped as \
{\"sub_questions\": [\"...\"]}. Use as few sub-questions as cover the question.";

const SUMMARIZE_PROMPT: &str = "You summarize retrieved passages as they bear on one question. \
Use only the passages; say so when they do not answer the question. Be dense and factual.";

const SYNTHESIZE_PROMPT: &str = "You write the final answer to a research question from \
per-sub-question research notes. Ground every claim in the notes. Where a sub-question could \
not be researched, acknowledge the gap instead of guessing.";

struct SubResearch {
	summary: String,
	round: RetrievalResult,
}

impl GroveEngine {
	/// Plan, research concurrently, synthesize. Individual sub-question
	/// failures are absorbed and surfaced as gaps; only the plan call, the
	/// synthesis call and a total research wipeout are fatal.
	pub(crate) async fn run_research(
		&self,
		query: &str,
		pipeline: &PipelineConfig,
		events: &mpsc::Sender<ChatEvent>,
		cancel: &CancellationToken,
	) -> Result<()> {
		chat::emit(events, cancel, ChatEvent::Status(StatusEvent::GeneratingQueries)).await?;

		let sub_questions = chat::with_cancel(cancel, self.plan(query)).await?;
		let records = agentic::query_records(&sub_questions, pipeline.mode);

		chat::emit(events, cancel, ChatEvent::Status(StatusEvent::Searching {
			queries: records,
		}))
		.await?;

		let concurrency = self.cfg.chat.research.concurrency.max(1) as usize;
		let research_futures: Vec<_> = sub_questions
			.iter()
			.enumerate()
			.map(|(position, sub_question)| async move {
				(position, self.research_one(sub_question, pipeline).await)
			})
			.collect();
		let research_all = stream::iter(research_futures)
			.buffer_unordered(concurrency)
			.collect::<Vec<_>>();
		let mut outcomes =
			chat::with_cancel(cancel, async { Ok::<_, Error>(research_all.await) }).await?;

		// Plan order, not completion order, so synthesis is deterministic.
		outcomes.sort_by_key(|(position, _)| *position);

		let mut state = ResearchState::new();
		let mut notes = Vec::with_capacity(outcomes.len());
		let mut gaps = Vec::new();
		let mut first_failure = None;

		for (position, outcome) in outcomes {
			let sub_question = &sub_questions[position];

			match outcome {
				Ok(sub) => {
					state.merge_round(sub.round);
					notes.push((sub_question.clone(), sub.summary));
				},
				Err(err) => {
					tracing::warn!(
						sub_question,
						error = %err,
						"Sub-question research failed; continuing with siblings."
					);
					gaps.push(sub_question.clone());

					if first_failure.is_none() {
						first_failure = Some(err);
					}
				},
			}
		}

		if notes.is_empty() {
			return Err(first_failure.unwrap_or(Error::Internal {
				message: "Research produced no results.".to_string(),
			}));
		}

		chat::emit(events, cancel, ChatEvent::Status(StatusEvent::GeneratingAnswer)).await?;
		chat::emit(events, cancel, ChatEvent::Sources { chunks: state.ranked_chunks() }).await?;

		self.synthesize(query, &notes, &gaps, events, cancel).await?;
		self.usage.record_queries(&pipeline.namespace, state.total_queries());
		chat::emit(events, cancel, ChatEvent::Done {
			total_queries: state.total_queries(),
			queries: state.query_log().to_vec(),
		})
		.await?;

		Ok(())
	}

	/// One planning call. Schema violations are fatal; there is nothing to
	/// research without a plan.
	async fn plan(&self, query: &str) -> Result<Vec<String>> {
		#[derive(serde::Deserialize)]
		struct Plan {
			sub_questions: Vec<String>,
		}

		let messages = [
			serde_json::json!({ "role": "system", "content": PLAN_PROMPT }),
			serde_json::json!({ "role": "user", "content": query }),
		];
		let json = self
			.providers
			.llm
			.generate_json(&self.cfg.providers.llm, &messages)
			.await
			.map_err(|err| Error::Llm { message: err.to_string() })?;
		let plan: Plan = serde_json::from_value(json).map_err(|_| Error::Llm {
			message: "Research plan did not match {\"sub_questions\": [...]}.".to_string(),
		})?;
		let mut sub_questions: Vec<String> = plan
			.sub_questions
			.into_iter()
			.map(|question| question.trim().to_string())
			.filter(|question| !question.is_empty())
			.collect();

		if sub_questions.is_empty() {
			return Err(Error::Llm {
				message: "Research plan contained no sub-questions.".to_string(),
			});
		}

		sub_questions.truncate(self.cfg.chat.research.max_sub_questions as usize);

		Ok(sub_questions)
	}

	async fn research_one(
		&self,
		sub_question: &str,
		pipeline: &PipelineConfig,
	) -> Result<SubResearch> {
		let round = self.retrieve_round(sub_question, pipeline).await?;
		let mut passages = String::new();

		for chunk in &round.results {
			let _ = writeln!(passages, "[{}] {}", chunk.id, chunk.text);
		}

		let messages = [
			serde_json::json!({ "role": "system", "content": SUMMARIZE_PROMPT }),
			serde_json::json!({
				"role": "user",
				"content": format!("Question: {sub_question}\n\nPassages:\n{passages}"),
			}),
		];
		let summary = self
			.providers
			.llm
			.generate(&self.cfg.providers.llm, &messages)
			.await
			.map_err(|err| Error::Llm { message: err.to_string() })?;

		Ok(SubResearch { summary, round })
	}

	async fn synthesize(
		&self,
		query: &str,
		notes: &[(String, String)],
		gaps: &[String],
		events: &mpsc::Sender<ChatEvent>,
		cancel: &CancellationToken,
	) -> Result<()> {
		let mut brief = format!("Question: {query}\n");

		for (sub_question, summary) in notes {
			let _ = write!(brief, "\n## {sub_question}\n{summary}\n");
		}
		if !gaps.is_empty() {
			let _ = write!(brief, "\nNot researched (acknowledge as gaps): {}", gaps.join("; "));
		}

		let messages = [
			serde_json::json!({ "role": "system", "content": SYNTHESIZE_PROMPT }),
			serde_json::json!({ "role": "user", "content": brief }),
		];
		let (delta_tx, mut delta_rx) = mpsc::channel::<LlmDelta>(32);
		let relay_events = events.clone();
		let relay_cancel = cancel.clone();
		let relay = tokio::spawn(async move {
			while let Some(delta) = delta_rx.recv().await {
				if let LlmDelta::Content(text) = delta
					&& chat::emit(&relay_events, &relay_cancel, ChatEvent::Delta { text })
						.await
						.is_err()
				{
					break;
				}
			}
		});
		let result = tokio::select! {
			_ = cancel.cancelled() => Err(Error::Cancelled),
			result = self.providers.llm.stream_chat(
				&self.cfg.providers.llm,
				&messages,
				&[],
				delta_tx,
			) => result.map_err(|err| {
				if cancel.is_cancelled() {
					Error::Cancelled
				} else {
					Error::Llm { message: err.to_string() }
				}
			}),
		};

		let _ = relay.await;
		result?;

		Ok(())
	}
}
