use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::{
    config::TrainingConfig,
    data::RawBatch,
    error::{Result, TrainError},
};

/// Resize, cast and mean-center `[batch, height, width, channels]` images.
///
/// The feature extractor was trained on images prepared this way, so the same
/// transform is applied to sourced batches, style images and generator output.
#[derive(Debug, Clone)]
pub struct Normalizer {
    width: usize,
    height: usize,
    mean: Vec<f32>,
}

impl Normalizer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            mean: config.mean.clone(),
        }
    }

    pub fn check_channels(&self, channels: usize) -> Result<()> {
        if channels != self.mean.len() {
            return Err(TrainError::ShapeMismatch {
                expected: self.mean.len(),
                actual: channels,
            });
        }
        Ok(())
    }

    pub fn normalize<B: Backend>(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let [_, _, _, channels] = images.dims();
        self.check_channels(channels)?;

        let images = self.resize(images);
        let mean = Tensor::<B, 1>::from_data(
            TensorData::new(self.mean.clone(), [channels]),
            &images.device(),
        )
        .reshape([1, 1, 1, channels]);

        Ok(images - mean)
    }

    /// Cast a decoded batch to floats and normalize it.
    pub fn normalize_raw<B: Backend>(
        &self,
        batch: &RawBatch,
        device: &B::Device,
    ) -> Result<Tensor<B, 4>> {
        self.check_channels(batch.channels())?;
        self.normalize(batch.to_tensor(device))
    }

    /// Bilinear resize to the configured size; a no-op when already there.
    pub fn resize<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, height, width, _] = images.dims();
        if height == self.height && width == self.width {
            return images;
        }

        let channels_first = images.permute([0, 3, 1, 2]);
        let resized = interpolate(
            channels_first,
            [self.height, self.width],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        );
        resized.permute([0, 2, 3, 1])
    }
}
