pub mod assistants;
pub mod auth;
pub mod files;
pub mod health;
pub mod messages;
pub mod models;
pub mod runs;
pub mod threads;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes split into **public** (no auth required — just the health probe)
/// and **protected** (gated behind the bearer-token middleware configured
/// via `config.auth.token_env`).
///
/// `state` is needed up front to wire the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health::health));

    let protected = Router::new()
        .route("/v1/models", get(models::list_models))
        .route("/v1/assistants", post(assistants::create_assistant))
        .route("/v1/assistants", get(assistants::list_assistants))
        .route("/v1/assistants/:id", get(assistants::get_assistant))
        .route("/v1/assistants/:id", post(assistants::update_assistant))
        .route("/v1/assistants/:id", delete(assistants::delete_assistant))
        .route("/v1/threads", post(threads::create_thread))
        .route("/v1/threads/:id", get(threads::get_thread))
        .route("/v1/threads/:id", delete(threads::delete_thread))
        .route("/v1/threads/:tid/messages", post(messages::create_message))
        .route("/v1/threads/:tid/messages", get(messages::list_messages))
        .route("/v1/threads/:tid/messages/:mid", get(messages::get_message))
        .route("/v1/threads/runs", post(runs::create_thread_and_run))
        .route("/v1/threads/:tid/runs", post(runs::create_run))
        .route("/v1/threads/:tid/runs", get(runs::list_runs))
        .route("/v1/threads/:tid/runs/:rid", get(runs::get_run))
        .route("/v1/threads/:tid/runs/:rid/cancel", post(runs::cancel_run))
        .route(
            "/v1/threads/:tid/runs/:rid/submit_tool_outputs",
            post(runs::submit_tool_outputs),
        )
        .route("/v1/files", post(files::upload_file))
        .route("/v1/files", get(files::list_files))
        .route("/v1/files/:id", get(files::get_file))
        .route("/v1/files/:id", delete(files::delete_file))
        .route("/v1/files/:id/content", get(files::get_file_content))
        .route_layer(middleware::from_fn_with_state(state, auth::require_api_token));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
