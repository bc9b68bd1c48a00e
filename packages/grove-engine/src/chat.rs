use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use grove_domain::{ChatRole, ChatTurn};

use crate::{
	ChatEvent, Error, GroveEngine, RagProvider, Result, RetrievalOverrides, StatusEvent, pipeline,
	router,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatMode {
	#[default]
	Agentic,
	DeepResearch,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatRequest {
	pub namespace: String,
	pub messages: Vec<ChatTurn>,
	#[serde(default)]
	pub mode: ChatMode,
	#[serde(flatten)]
	pub overrides: RetrievalOverrides,
}

impl GroveEngine {
	/// Streaming chat entry point. Events flow through `events`; dropping
	/// the receiver or cancelling the token stops the request without
	/// further events or usage increments.
	pub async fn chat(
		&self,
		req: ChatRequest,
		events: mpsc::Sender<ChatEvent>,
		cancel: CancellationToken,
	) -> Result<()> {
		let Some(latest) = req.messages.last() else {
			return Err(Error::InvalidRequest { message: "messages must not be empty.".to_string() });
		};

		if latest.role != ChatRole::User {
			return Err(Error::InvalidRequest {
				message: "The final message must come from the user.".to_string(),
			});
		}
		if latest.content.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "The final message must not be empty.".to_string(),
			});
		}

		let settings = self.namespaces.resolve(&req.namespace).await?;
		let pipeline = pipeline::resolve_pipeline(
			&req.namespace,
			&settings,
			&req.overrides,
			self.cfg.index.keyword.is_some(),
			self.cfg.providers.remote.is_some(),
		)?;

		self.usage.check_quota(&req.namespace).await?;

		if pipeline.rag_provider == RagProvider::Remote {
			let query = match req.mode {
				ChatMode::Agentic => latest.content.clone(),
				ChatMode::DeepResearch =>
					with_cancel(&cancel, self.condense_query(&req.messages)).await?,
			};

			match with_cancel(&cancel, self.remote_round(&query, &pipeline)).await {
				Ok(outcome) => {
					emit(&events, &cancel, ChatEvent::Status(StatusEvent::GeneratingAnswer))
						.await?;
					emit(&events, &cancel, ChatEvent::Sources {
						chunks: outcome.response.chunks,
					})
					.await?;
					emit(&events, &cancel, ChatEvent::Delta { text: outcome.answer }).await?;

					self.usage.record_queries(&req.namespace, outcome.response.total_queries);

					emit(&events, &cancel, ChatEvent::Done {
						total_queries: outcome.response.total_queries,
						queries: outcome.response.queries,
					})
					.await?;

					return Ok(());
				},
				Err(Error::Cancelled) => return Err(Error::Cancelled),
				Err(err) => router::log_remote_fallback(&err),
			}
		}

		match req.mode {
			ChatMode::Agentic => self.run_agentic(&req.messages, &pipeline, &events, &cancel).await,
			ChatMode::DeepResearch => {
				let query = with_cancel(&cancel, self.condense_query(&req.messages)).await?;

				self.run_research(&query, &pipeline, &events, &cancel).await
			},
		}
	}
}

/// Sends one event unless cancellation was observed. A dropped receiver is
/// treated as cancellation: the client is gone.
pub(crate) async fn emit(
	events: &mpsc::Sender<ChatEvent>,
	cancel: &CancellationToken,
	event: ChatEvent,
) -> Result<()> {
	if cancel.is_cancelled() {
		return Err(Error::Cancelled);
	}

	events.send(event).await.map_err(|_| Error::Cancelled)
}

pub(crate) async fn with_cancel<T>(
	cancel: &CancellationToken,
	fut: impl Future<Output = Result<T>>,
) -> Result<T> {
	tokio::select! {
		_ = cancel.cancelled() => Err(Error::Cancelled),
		result = fut => result,
	}
}

/// Conversation turns rendered as wire-format chat messages.
pub(crate) fn render_history(turns: &[ChatTurn]) -> Vec<Value> {
	turns
		.iter()
		.map(|turn| {
			let role = match turn.role {
				ChatRole::User => "user",
				ChatRole::Assistant => "assistant",
			};

			serde_json::json!({ "role": role, "content": turn.content })
		})
		.collect()
}
