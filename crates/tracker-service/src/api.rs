//! HTTP API for intent creation, queries and cancellation.

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
	routing::{delete, get, post},
	Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use tracker_core::Reconciler;
use tracker_dispatch::{ActionDispatcher, DispatchError};
use tracker_storage::{IntentStore, StoreError};
use tracker_types::NewIntent;

#[derive(Clone)]
pub struct AppState {
	store: Arc<IntentStore>,
	dispatcher: Arc<ActionDispatcher>,
	reconciler: Arc<Reconciler>,
}

impl AppState {
	pub fn new(
		store: Arc<IntentStore>,
		dispatcher: Arc<ActionDispatcher>,
		reconciler: Arc<Reconciler>,
	) -> Self {
		Self {
			store,
			dispatcher,
			reconciler,
		}
	}
}

pub async fn start_http_server(state: AppState, port: u16) -> anyhow::Result<()> {
	let app = Router::new()
		.route("/intents", post(create_intent))
		.route("/intents", get(list_active_intents))
		.route("/intents/{id}", get(get_intent))
		.route("/intents/{id}", delete(cancel_intent))
		.route("/health", get(health_check))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive());

	let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
	info!("API server listening on port {}", port);

	axum::serve(listener, app).await?;
	Ok(())
}

fn error_body(message: String) -> Json<serde_json::Value> {
	Json(serde_json::json!({ "error": message }))
}

fn store_error_response(e: StoreError) -> (StatusCode, Json<serde_json::Value>) {
	let status = match &e {
		StoreError::Validation(_) => StatusCode::BAD_REQUEST,
		StoreError::NotFound(_) => StatusCode::NOT_FOUND,
		StoreError::InvalidTransition(_) | StoreError::IntentStillActive(_) => {
			StatusCode::CONFLICT
		}
		StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
	};
	(status, error_body(e.to_string()))
}

/// POST /intents — validates and stores a new intent.
async fn create_intent(
	State(state): State<AppState>,
	Json(params): Json<NewIntent>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
	let intent = state
		.store
		.create(params)
		.await
		.map_err(store_error_response)?;

	info!(intent_id = %intent.id, kind = %intent.kind, "intent created");
	Ok((
		StatusCode::CREATED,
		Json(serde_json::to_value(&intent).unwrap_or_default()),
	))
}

/// GET /intents — every intent the reconciler still polls.
async fn list_active_intents(
	State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
	let intents = state
		.store
		.list_active()
		.await
		.map_err(store_error_response)?;

	Ok(Json(serde_json::json!({
		"count": intents.len(),
		"intents": intents,
	})))
}

/// GET /intents/{id} — last successfully reconciled state of one intent.
async fn get_intent(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
	let intent = state.store.get(&id).await.map_err(store_error_response)?;
	Ok(Json(serde_json::to_value(&intent).unwrap_or_default()))
}

/// DELETE /intents/{id} — requests cancellation through the dispatcher.
async fn cancel_intent(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
	let intent = state.store.get(&id).await.map_err(store_error_response)?;

	match state.dispatcher.cancel(&intent).await {
		Ok(updated) => Ok(Json(serde_json::to_value(&updated).unwrap_or_default())),
		Err(DispatchError::CancellationFailed { reason, .. }) => Err((
			// Release failed; the intent keeps its status and the caller
			// may retry.
			StatusCode::BAD_GATEWAY,
			error_body(format!("cancellation failed: {}", reason)),
		)),
		Err(DispatchError::Store(e)) => Err(store_error_response(e)),
	}
}

/// GET /health — process liveness plus loop state.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"status": "ok",
		"reconciler": state.reconciler.state().await.to_string(),
		"timestamp": tracker_types::current_timestamp(),
	}))
}
