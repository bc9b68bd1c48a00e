#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Rate limit exceeded: {message}")]
	RateLimited { message: String },
	#[error("Embedding error: {message}")]
	Embedding { message: String },
	#[error("Index error: {message}")]
	Index { message: String },
	#[error("Keyword store error: {message}")]
	Keyword { message: String },
	#[error("Model error: {message}")]
	Llm { message: String },
	#[error("Remote provider error: {message}")]
	Remote { message: String },
	#[error("Internal error: {message}")]
	Internal { message: String },
	#[error("Request cancelled.")]
	Cancelled,
}

impl From<grove_index::Error> for Error {
	fn from(err: grove_index::Error) -> Self {
		match err {
			grove_index::Error::InvalidFilter(message) => Self::InvalidRequest { message },
			other => Self::Index { message: other.to_string() },
		}
	}
}
