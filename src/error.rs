use std::path::PathBuf;

use burn::record::RecorderError;

pub type Result<T, E = TrainError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("failed to load config {path:?}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("shape mismatch: image has {actual} channels but `mean` has {expected} entries")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("feature extractor produced no activation for layer `{0}`")]
    MissingLayer(String),

    #[error("loss diverged at step {step}: total loss is {loss}")]
    Divergence { step: usize, loss: f32 },

    #[error("failed to restore checkpoint at step {step}: {reason}")]
    Restore { step: usize, reason: String },

    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("failed to serialize training state: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to read image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no usable images found in {0:?}")]
    NoUsableImages(PathBuf),

    #[error("image source stopped before the run finished")]
    SourceClosed,

    #[error("trainer is {actual:?}, expected {expected:?}")]
    InvalidPhase {
        expected: crate::training::TrainerPhase,
        actual: crate::training::TrainerPhase,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
