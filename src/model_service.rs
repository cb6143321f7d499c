use crate::error::PredictionError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

/// Probability scores for the two car components the detector was trained
/// on. The output layer order of the artifact fixes which index is which.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScores {
    pub hood_probability: f32,
    pub backdoor_probability: f32,
}

#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, image_path: &Path) -> Result<ComponentScores, PredictionError>;

    /// Whether a model handle is currently loaded.
    fn ready(&self) -> bool;
}
