use crate::{
    config::ModelConfig,
    error::PredictionError,
    model_service::{ComponentScores, ModelService},
};
use async_trait::async_trait;
use image::imageops::FilterType;
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

const INPUT_SIZE: u32 = 224;

/// Decode the image at `path` and turn it into the NHWC tensor the detector
/// expects: shape (1, 224, 224, 3), channel values scaled to [-1, 1].
pub fn preprocess_image(path: &Path) -> Result<Array4<f32>, PredictionError> {
    let reader = image::ImageReader::open(path)
        .map_err(|source| PredictionError::ImageNotFound {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| PredictionError::ImageNotFound {
            path: path.to_path_buf(),
            source,
        })?;

    let img = reader
        .decode()
        .map_err(|source| PredictionError::ImageDecode {
            path: path.to_path_buf(),
            source,
        })?;

    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
    let rgb = resized.to_rgb8();

    // The raw buffer is already interleaved HWC, which is exactly the NHWC
    // layout of the Keras export.
    let size = INPUT_SIZE as usize;
    let data: Vec<f32> = rgb
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 127.5 - 1.0)
        .collect();

    Array4::from_shape_vec((1, size, size, 3), data)
        .map_err(|e| PredictionError::Preprocess(format!("failed to shape input tensor: {e}")))
}

/// Runs predictions against a single ONNX session shared by all requests.
///
/// The session is loaded eagerly at startup when the artifact is on disk.
/// If it is not, the service still comes up and every prediction retries the
/// load, so a missing artifact surfaces as a not-found error naming the
/// configured path rather than a crash.
#[derive(Clone)]
pub struct OrtModelService {
    session: Arc<Mutex<Option<Session>>>,
    model_path: PathBuf,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, PredictionError> {
        let _ = ort::init().with_name("car_prediction").commit();

        let model_path = model_config.get_model_path();
        let session = if model_path.is_file() {
            let session = load_session(&model_path)?;
            tracing::info!(model = %model_path.display(), "loaded ONNX session");
            Some(session)
        } else {
            tracing::warn!(
                model = %model_path.display(),
                "model artifact not found, predictions will fail until it appears"
            );
            None
        };

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            model_path,
        })
    }

    fn ensure_session(&self) -> Result<(), PredictionError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|e| PredictionError::Unexpected(format!("session mutex poisoned: {e}")))?;

        if guard.is_none() {
            if !self.model_path.is_file() {
                return Err(PredictionError::ModelNotFound(self.model_path.clone()));
            }
            let session = load_session(&self.model_path)?;
            tracing::info!(model = %self.model_path.display(), "loaded ONNX session");
            *guard = Some(session);
        }

        Ok(())
    }

    fn run_inference(&self, input: Array4<f32>) -> Result<Vec<f32>, PredictionError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|e| PredictionError::Unexpected(format!("session mutex poisoned: {e}")))?;
        let session = guard
            .as_mut()
            .ok_or_else(|| PredictionError::ModelNotFound(self.model_path.clone()))?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| PredictionError::Unexpected("model declares no inputs".to_string()))?;

        let input_tensor = Value::from_array(input)
            .map_err(|e| PredictionError::Preprocess(format!("failed to create tensor value: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_name.as_str() => input_tensor])
            .map_err(PredictionError::Inference)?;

        let output = outputs.values().next().ok_or_else(|| {
            PredictionError::UnexpectedOutput("model produced no outputs".to_string())
        })?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(PredictionError::Inference)?;

        Ok(data.to_vec())
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image_path: &Path) -> Result<ComponentScores, PredictionError> {
        self.ensure_session()?;

        let input = preprocess_image(image_path)?;
        let outputs = self.run_inference(input)?;

        // The batch dimension is always 1, so the first row is the whole
        // output. Index 0 is the hood score, index 1 the backdoor score.
        if outputs.len() < 2 {
            return Err(PredictionError::UnexpectedOutput(format!(
                "expected at least two scores, got {}",
                outputs.len()
            )));
        }

        Ok(ComponentScores {
            hood_probability: outputs[0],
            backdoor_probability: outputs[1],
        })
    }

    fn ready(&self) -> bool {
        self.session
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

fn load_session(path: &Path) -> Result<Session, PredictionError> {
    Session::builder()
        .map_err(PredictionError::ModelLoad)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(PredictionError::ModelLoad)?
        .commit_from_file(path)
        .map_err(PredictionError::ModelLoad)
}
