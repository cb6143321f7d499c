mod health;
mod predict;

use crate::{model_service::ModelService, server::SharedState};
use axum::{routing::get, Router};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route(
            "/predict",
            get(predict::predict_status).post(predict::predict::<M>),
        )
        .route("/health", get(health::healthcheck::<M>))
}
