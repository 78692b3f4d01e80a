use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: &'static str,
    pub description: &'static str,
}

pub async fn root(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: state.config.server.project_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        description: "LLM-powered symptom analysis system with vector similarity search",
    })
}
