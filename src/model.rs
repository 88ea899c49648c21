pub mod generator;
mod layers;
pub mod vgg19;

use burn::prelude::*;
use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, TrainError};

/// Trainable image-to-image network.
///
/// Takes normalized `[batch, height, width, channels]` images and returns raw
/// images in the 0-255 range with the same shape.
pub trait StyleGenerator<B: Backend> {
    fn infer(&self, content: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Frozen network exposing intermediate activations by layer name.
pub trait FeatureExtractor<B: Backend> {
    /// Run one forward pass over normalized `[batch, height, width, channels]`
    /// images, returning at least the activations named in `layers`.
    fn extract(&self, images: Tensor<B, 4>, layers: &BTreeSet<String>)
        -> Result<LayerActivationMap<B>>;
}

/// Activations of one forward pass, keyed by layer name. Each tensor is laid
/// out `[batch, channels, height, width]`.
#[derive(Debug, Clone)]
pub struct LayerActivationMap<B: Backend> {
    layers: HashMap<String, Tensor<B, 4>>,
}

impl<B: Backend> Default for LayerActivationMap<B> {
    fn default() -> Self {
        Self {
            layers: HashMap::new(),
        }
    }
}

impl<B: Backend> LayerActivationMap<B> {
    pub fn insert(&mut self, layer: impl Into<String>, activation: Tensor<B, 4>) {
        self.layers.insert(layer.into(), activation);
    }

    pub fn get(&self, layer: &str) -> Result<&Tensor<B, 4>> {
        self.layers
            .get(layer)
            .ok_or_else(|| TrainError::MissingLayer(layer.to_string()))
    }

    /// Split a joined `generated ++ original` activation into its two halves.
    pub fn halves(&self, layer: &str) -> Result<(Tensor<B, 4>, Tensor<B, 4>)> {
        let activation = self.get(layer)?;
        let half = activation.dims()[0] / 2;

        Ok((
            activation.clone().narrow(0, 0, half),
            activation.clone().narrow(0, half, half),
        ))
    }

    pub fn contains(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_halves_splits_batch() {
        let device = Default::default();
        let joined = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::zeros([2, 1, 2, 2], &device),
                Tensor::ones([2, 1, 2, 2], &device),
            ],
            0,
        );
        let mut map = LayerActivationMap::default();
        map.insert("relu1_1", joined);

        let (generated, original) = map.halves("relu1_1").unwrap();
        assert_eq!(generated.dims(), [2, 1, 2, 2]);
        assert_eq!(generated.sum().into_scalar(), 0.0);
        assert_eq!(original.sum().into_scalar(), 8.0);
    }

    #[test]
    fn test_missing_layer() {
        let map = LayerActivationMap::<TestBackend>::default();
        assert!(matches!(map.get("relu3_1"), Err(TrainError::MissingLayer(layer)) if layer == "relu3_1"));
    }
}
