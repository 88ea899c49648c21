use burn::config::Config;
use std::path::{Path, PathBuf};

use crate::{
    error::{Result, TrainError},
    model::vgg19::VGG19_LAYERS,
};

/// Training configuration loaded from a JSON file.
///
/// Every key the trainer needs to reproduce a run is required; only the data
/// loading knobs carry defaults.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Directory receiving checkpoints and the `summary/` stream.
    pub model_dir: String,
    /// Pretrained VGG19 weights (named mpk record).
    pub feature_path: String,
    /// Style reference image(s); their statistics are averaged.
    pub style_images: Vec<String>,
    pub width: usize,
    pub height: usize,
    /// Per-channel mean subtracted by the normalizer.
    pub mean: Vec<f32>,
    pub style_weight: f32,
    pub content_weight: f32,
    pub tv_weight: f32,
    pub lr: f64,
    pub max_iter: usize,
    /// Log the loss components every `display` iterations.
    pub display: usize,
    /// Checkpoint and write summaries every `snapshot` completed updates.
    pub snapshot: usize,
    pub content_layers: Vec<String>,
    pub style_layers: Vec<String>,
    /// Resume from the latest checkpoint in `model_dir` when one exists.
    pub finetune: bool,

    /// Directory of content images, searched recursively.
    #[config(default = "String::from(\"train\")")]
    pub train_dir: String,
    #[config(default = 4)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 8)]
    pub queue_capacity: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Load and validate a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TrainError::ConfigLoad {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }

        let config = Self::load(path).map_err(|err| TrainError::ConfigLoad {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, weight) in [
            ("style_weight", self.style_weight),
            ("content_weight", self.content_weight),
            ("tv_weight", self.tv_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return invalid(field, format!("must be a non-negative number, got {weight}"));
            }
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return invalid("lr", format!("must be positive, got {}", self.lr));
        }

        for (field, value) in [
            ("display", self.display),
            ("snapshot", self.snapshot),
            ("batch_size", self.batch_size),
            ("num_workers", self.num_workers),
            ("queue_capacity", self.queue_capacity),
        ] {
            if value == 0 {
                return invalid(field, "must be at least 1".to_string());
            }
        }

        // the generator downsamples twice before upscaling back
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 4 != 0 {
                return invalid(field, format!("must be a positive multiple of 4, got {value}"));
            }
        }

        if self.mean.is_empty() {
            return invalid("mean", "must list one value per channel".to_string());
        }
        if self.style_images.is_empty() {
            return invalid("style_images", "at least one style image is required".to_string());
        }

        for (field, layers) in [
            ("content_layers", &self.content_layers),
            ("style_layers", &self.style_layers),
        ] {
            if layers.is_empty() {
                return invalid(field, "at least one layer is required".to_string());
            }
            if let Some(unknown) = layers
                .iter()
                .find(|layer| !VGG19_LAYERS.contains(&layer.as_str()))
            {
                return invalid(field, format!("unknown layer `{unknown}`"));
            }
        }

        Ok(())
    }

    pub fn model_dir(&self) -> PathBuf {
        PathBuf::from(&self.model_dir)
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.model_dir().join("summary")
    }
}

fn invalid(field: &'static str, reason: String) -> Result<()> {
    Err(TrainError::InvalidConfig { field, reason })
}

#[cfg(test)]
pub(crate) fn test_config(model_dir: &Path) -> TrainingConfig {
    TrainingConfig::new(
        model_dir.display().to_string(),
        "unused".to_string(),
        vec![model_dir.join("style.png").display().to_string()],
        8,
        8,
        vec![120.0, 110.0, 100.0],
        2.0,
        1.0,
        0.0,
        1e-3,
        4,
        1,
        2,
        vec!["relu1_1".to_string(), "relu1_2".to_string()],
        vec!["relu1_1".to_string(), "relu2_1".to_string()],
        false,
    )
    .with_batch_size(2)
}
