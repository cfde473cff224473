use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracker_adapter::{AdapterService, ExternalStateAdapter};
use tracker_config::{ConfigLoader, TrackerConfig};
use tracker_core::{ReconcilerBuilder, ReconcilerConfig};
use tracker_dispatch::ActionDispatcher;
use tracker_storage::{IntentStore, StorageInterface, StorageService};
use tracker_types::EventBus;

mod api;

#[derive(Parser)]
#[command(name = "intent-tracker")]
#[command(about = "Intent tracker with periodic reconciliation", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "TRACKER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the tracker service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting intent tracker");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration loaded successfully");
	info!("Tracker name: {}", config.tracker.name);
	info!("HTTP port: {}", config.tracker.http_port);

	// Wire storage, adapter and dispatcher from configuration.
	let storage_backend = create_storage_backend(&config)?;
	let store = Arc::new(IntentStore::new(StorageService::new(storage_backend)));

	let adapter_backend = create_adapter(&config)?;
	let adapter = Arc::new(AdapterService::new(
		adapter_backend,
		Duration::from_secs(config.reconciler.adapter_timeout_secs),
	));

	let event_bus = EventBus::new(1024);
	let dispatcher = Arc::new(ActionDispatcher::new(
		store.clone(),
		adapter.clone(),
		event_bus.clone(),
	));

	let reconciler = ReconcilerBuilder::new(store.clone(), adapter)
		.with_dispatcher(dispatcher.clone())
		.with_event_bus(event_bus)
		.with_config(ReconcilerConfig {
			interval: Duration::from_secs(config.reconciler.interval_secs),
			completion_ratio: config.reconciler.completion_ratio,
		})
		.build();

	reconciler.start().await;

	// Serve the HTTP API.
	let service = api::AppState::new(store, dispatcher, reconciler.clone());
	let http_port = config.tracker.http_port;
	let http_handle = tokio::spawn(async move { api::start_http_server(service, http_port).await });

	info!("Intent tracker started successfully");

	shutdown_signal().await;
	info!("Shutdown signal received, stopping services...");

	// Stop the loop first so no cycle is cut off mid-mutation.
	reconciler.stop().await;
	http_handle.abort();

	info!("Intent tracker stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Tracker name: {}", config.tracker.name);
	info!("Storage backend: {}", config.storage.kind);
	info!("Adapter kind: {}", config.adapter.kind);
	info!(
		"Reconcile interval: {}s, completion ratio: {}",
		config.reconciler.interval_secs, config.reconciler.completion_ratio
	);

	Ok(())
}

fn create_storage_backend(config: &TrackerConfig) -> Result<Box<dyn StorageInterface>> {
	let backend = match config.storage.kind.as_str() {
		"memory" => {
			tracker_storage::implementations::memory::create_storage(&config.storage.config)
		}
		"file" => tracker_storage::implementations::file::create_storage(&config.storage.config),
		other => anyhow::bail!("Unknown storage backend: {}", other),
	};
	Ok(backend)
}

fn create_adapter(config: &TrackerConfig) -> Result<Box<dyn ExternalStateAdapter>> {
	let adapter = match config.adapter.kind.as_str() {
		"simulated" => {
			tracker_adapter::implementations::simulated::create_adapter(&config.adapter.config)
		}
		other => anyhow::bail!("Unknown adapter kind: {}", other),
	};
	Ok(adapter)
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
