pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use grove_index::WarmCacheOutcome;

use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(
	version = grove_cli::VERSION,
	rename_all = "kebab",
	styles = grove_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = grove_config::load(&args.config)?;

	init_tracing(&config)?;

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let state = AppState::new(config)?;

	match state.engine.index.warm_cache().await {
		Ok(WarmCacheOutcome::Warmed) => tracing::info!("Vector index cache warmed."),
		Ok(WarmCacheOutcome::Unsupported) => {},
		Err(err) => tracing::warn!(error = %err, "Vector index warm-up failed; continuing."),
	}

	if let Some(remote) = state.engine.cfg.providers.remote.as_ref() {
		match grove_providers::remote::health(remote).await {
			Ok(()) => tracing::info!("Remote provider is healthy."),
			Err(err) => tracing::warn!(
				error = %err,
				"Remote provider health check failed; requests will fall back to the local pipeline."
			),
		}
	}

	let app = routes::router(state);
	let listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	axum::serve(listener, app).await?;

	Ok(())
}

fn init_tracing(config: &grove_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	Ok(())
}
