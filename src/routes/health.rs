use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model_ready: bool,
}

pub async fn healthcheck<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
        model_ready: state.model_service.ready(),
    })
}
