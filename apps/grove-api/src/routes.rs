use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use grove_engine::{ChatEvent, ChatRequest, Error as EngineError, SearchRequest, SearchResponse};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/search", post(search))
		.route("/v1/chat", post(chat))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	let response = state.engine.search(payload).await?;

	Ok(Json(response))
}

/// Streaming chat. The response is always an SSE stream; failures after the
/// stream opens surface as one terminal `error` event, and text already
/// streamed is never retracted.
async fn chat(
	State(state): State<AppState>,
	Json(payload): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
	let (events_tx, events_rx) = mpsc::channel::<ChatEvent>(64);
	let cancel = CancellationToken::new();
	let task_cancel = cancel.clone();
	let engine = state.engine.clone();

	tokio::spawn(async move {
		if let Err(err) = engine.chat(payload, events_tx.clone(), task_cancel).await
			&& !matches!(err, EngineError::Cancelled)
		{
			tracing::warn!(error = %err, "Chat request failed.");

			let (_, error_code) = status_for(&err);
			let _ = events_tx
				.send(ChatEvent::Error {
					error_code: error_code.to_string(),
					message: err.to_string(),
				})
				.await;
		}
	});

	// Dropping the stream on client disconnect drops the guard, which
	// cancels the engine task.
	let guard = cancel.drop_guard();
	let stream = ReceiverStream::new(events_rx).map(move |event| {
		let _ = &guard;

		Event::default().event(event.name()).json_data(&event)
	});

	Sse::new(stream).keep_alive(KeepAlive::default())
}

fn status_for(err: &EngineError) -> (StatusCode, &'static str) {
	match err {
		EngineError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
		EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
		EngineError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
		EngineError::Embedding { .. }
		| EngineError::Index { .. }
		| EngineError::Keyword { .. }
		| EngineError::Llm { .. }
		| EngineError::Remote { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
		EngineError::Internal { .. } | EngineError::Cancelled =>
			(StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: &'static str,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
}

impl From<EngineError> for ApiError {
	fn from(err: EngineError) -> Self {
		let (status, error_code) = status_for(&err);

		Self { status, error_code, message: err.to_string() }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
