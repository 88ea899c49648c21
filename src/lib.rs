pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod model;
pub mod normalize;
pub mod style;
pub mod summary;
pub mod training;
pub mod utils;

#[cfg(test)]
mod testing;

use burn::backend::Autodiff;

#[cfg(not(feature = "ndarray"))]
pub type MyBackend = burn::backend::Wgpu<f32>;
#[cfg(feature = "ndarray")]
pub type MyBackend = burn::backend::NdArray<f32>;

pub type MyAutodiffBackend = Autodiff<MyBackend>;

pub use config::TrainingConfig;
pub use error::{Result, TrainError};
pub use training::{train, Trainer, TrainerPhase, TrainingReport};
