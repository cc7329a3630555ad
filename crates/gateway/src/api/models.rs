//! `GET /v1/models` — models this gateway can route to, resolved against the
//! model -> provider table built at startup (`state::build_model_router`).

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let mut data: Vec<serde_json::Value> = state
        .model_router
        .iter()
        .map(|(name, route)| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": route.provider_id,
            })
        })
        .collect();
    data.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

    Json(serde_json::json!({
        "object": "list",
        "data": data,
    }))
}
