use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Failed to read config file at {path:?}.")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("Config file at {path:?} is not valid TOML.")]
	Parse { path: PathBuf, source: toml::de::Error },
	#[error("Invalid config: {message}")]
	Validation { message: String },
}
impl Error {
	pub(crate) fn validation(message: impl Into<String>) -> Self {
		Self::Validation { message: message.into() }
	}
}
