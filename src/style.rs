use burn::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::{
    config::TrainingConfig,
    error::{Result, TrainError},
    loss::gram_matrix,
    model::{FeatureExtractor, LayerActivationMap},
    normalize::Normalizer,
    utils::{images_to_batch, load_image},
};

/// Gram statistics of the style reference image(s), one `[1, channels,
/// channels]` tensor per style layer. Computed once and detached.
#[derive(Debug, Clone)]
pub struct StyleSignature<B: Backend> {
    grams: BTreeMap<String, Tensor<B, 3>>,
}

impl<B: Backend> StyleSignature<B> {
    /// Load the configured style images, normalize them and run the extractor
    /// over them once.
    pub fn compute<E: FeatureExtractor<B>>(
        config: &TrainingConfig,
        normalizer: &Normalizer,
        extractor: &E,
        device: &B::Device,
    ) -> Result<Self> {
        let images = config
            .style_images
            .iter()
            .map(|path| load_image(path, config.width, config.height))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "computing style signature from {} image(s) over {:?}",
            images.len(),
            config.style_layers
        );

        let batch = normalizer.normalize_raw::<B>(&images_to_batch(&images), device)?;
        let layers = config.style_layers.iter().cloned().collect::<BTreeSet<_>>();
        let activations = extractor.extract(batch, &layers)?;

        Self::from_activations(&activations, &config.style_layers)
    }

    /// Average the per-image Gram matrices of each layer.
    pub fn from_activations(activations: &LayerActivationMap<B>, layers: &[String]) -> Result<Self> {
        let mut grams = BTreeMap::new();
        for layer in layers {
            let gram = gram_matrix(activations.get(layer)?.clone())
                .mean_dim(0)
                .detach();
            grams.insert(layer.clone(), gram);
        }

        Ok(Self { grams })
    }

    pub fn get(&self, layer: &str) -> Result<&Tensor<B, 3>> {
        self.grams
            .get(layer)
            .ok_or_else(|| TrainError::MissingLayer(layer.to_string()))
    }

    pub fn layers(&self) -> impl Iterator<Item = &str> {
        self.grams.keys().map(String::as_str)
    }
}
