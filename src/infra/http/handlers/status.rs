//! Operational status payload for the admin surface.

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::infra::http::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub instance_start_time: String,
    pub unsaved_queue_depth: usize,
    pub max_unsaved_queue_depth: u64,
    pub db_errors: u64,
    pub recovered_panics: u64,
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.cache.queue();
    Json(MetricsResponse {
        instance_start_time: state.stats.started_at(),
        unsaved_queue_depth: queue.depth(),
        max_unsaved_queue_depth: queue.high_water(),
        db_errors: state.stats.db_errors(),
        recovered_panics: state.stats.recovered_panics(),
    })
}
