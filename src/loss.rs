use burn::{prelude::*, tensor::cast::ToElement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{
    config::TrainingConfig,
    error::{Result, TrainError},
    model::LayerActivationMap,
    style::StyleSignature,
};

// ////////////////////////////////////////////////////////////////////////////
// Loss terms
/// `F·Fᵀ / (height·width)` of a `[batch, channels, height, width]` activation.
pub fn gram_matrix<B: Backend>(activation: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = activation.dims();
    let positions = height * width;

    let features = activation.reshape([batch, channels, positions]);
    features
        .clone()
        .matmul(features.swap_dims(1, 2))
        .div_scalar(positions as f32)
}

fn mean_squared<B: Backend, const D: usize>(diff: Tensor<B, D>) -> Tensor<B, 1> {
    (diff.clone() * diff).mean()
}

fn sum_terms<B: Backend>(terms: Vec<Tensor<B, 1>>, field: &'static str) -> Result<Tensor<B, 1>> {
    if terms.is_empty() {
        return Err(TrainError::InvalidConfig {
            field,
            reason: "at least one layer is required".to_string(),
        });
    }
    Ok(Tensor::cat(terms, 0).sum())
}

/// Sum over layers of the mean squared distance between the generated and the
/// original half of each joined activation.
pub fn content_loss<B: Backend>(
    activations: &LayerActivationMap<B>,
    content_layers: &[String],
) -> Result<Tensor<B, 1>> {
    let terms = content_layers
        .iter()
        .map(|layer| {
            let (generated, original) = activations.halves(layer)?;
            Ok(mean_squared(generated - original))
        })
        .collect::<Result<Vec<_>>>()?;

    sum_terms(terms, "content_layers")
}

/// Sum over layers of the mean squared distance between the Gram matrix of the
/// generated half and the style signature.
pub fn style_loss<B: Backend>(
    activations: &LayerActivationMap<B>,
    style_layers: &[String],
    signature: &StyleSignature<B>,
) -> Result<Tensor<B, 1>> {
    let terms = style_layers
        .iter()
        .map(|layer| {
            let (generated, _) = activations.halves(layer)?;
            let target = signature.get(layer)?.clone();
            Ok(mean_squared(gram_matrix(generated) - target))
        })
        .collect::<Result<Vec<_>>>()?;

    sum_terms(terms, "style_layers")
}

/// Mean squared difference between vertically and horizontally adjacent
/// pixels of raw `[batch, height, width, channels]` images.
pub fn tv_loss<B: Backend>(generated: Tensor<B, 4>) -> Tensor<B, 1> {
    let [_, height, width, _] = generated.dims();
    let mut loss = Tensor::zeros([1], &generated.device());

    if height > 1 {
        let diff = generated.clone().narrow(1, 1, height - 1)
            - generated.clone().narrow(1, 0, height - 1);
        loss = loss + mean_squared(diff);
    }
    if width > 1 {
        let diff =
            generated.clone().narrow(2, 1, width - 1) - generated.narrow(2, 0, width - 1);
        loss = loss + mean_squared(diff);
    }

    loss
}

// ////////////////////////////////////////////////////////////////////////////
// Composer
/// Extra term added to the objective, evaluated on the raw generated images.
pub type AuxiliaryLoss<B> = Box<dyn Fn(&Tensor<B, 4>) -> Tensor<B, 1> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct LossBreakdown<B: Backend> {
    pub content: Tensor<B, 1>,
    pub style: Tensor<B, 1>,
    pub tv: Tensor<B, 1>,
    pub weighted_content: Tensor<B, 1>,
    pub weighted_style: Tensor<B, 1>,
    pub weighted_tv: Tensor<B, 1>,
    pub auxiliary: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

/// Host-side copy of a [`LossBreakdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossValues {
    pub content: f32,
    pub style: f32,
    pub tv: f32,
    pub weighted_content: f32,
    pub weighted_style: f32,
    pub weighted_tv: f32,
    pub auxiliary: f32,
    pub total: f32,
}

impl<B: Backend> LossBreakdown<B> {
    pub fn values(&self) -> LossValues {
        let scalar = |tensor: &Tensor<B, 1>| tensor.clone().into_scalar().to_f32();

        LossValues {
            content: scalar(&self.content),
            style: scalar(&self.style),
            tv: scalar(&self.tv),
            weighted_content: scalar(&self.weighted_content),
            weighted_style: scalar(&self.weighted_style),
            weighted_tv: scalar(&self.weighted_tv),
            auxiliary: scalar(&self.auxiliary),
            total: scalar(&self.total),
        }
    }
}

/// Combines content, style and total-variation losses into one objective.
/// A zero weight keeps the term out of the total; its unweighted value is
/// still reported.
pub struct LossComposer<B: Backend> {
    style_weight: f32,
    content_weight: f32,
    tv_weight: f32,
    content_layers: Vec<String>,
    style_layers: Vec<String>,
    layers: BTreeSet<String>,
    signature: StyleSignature<B>,
    auxiliary: Vec<(String, AuxiliaryLoss<B>)>,
}

impl<B: Backend> LossComposer<B> {
    pub fn new(config: &TrainingConfig, signature: StyleSignature<B>) -> Self {
        let layers = config
            .content_layers
            .iter()
            .chain(config.style_layers.iter())
            .cloned()
            .collect();

        Self {
            style_weight: config.style_weight,
            content_weight: config.content_weight,
            tv_weight: config.tv_weight,
            content_layers: config.content_layers.clone(),
            style_layers: config.style_layers.clone(),
            layers,
            signature,
            auxiliary: Vec::new(),
        }
    }

    /// Register an extra term that is added, unweighted, to the total.
    pub fn register_auxiliary(&mut self, name: impl Into<String>, loss: AuxiliaryLoss<B>) {
        self.auxiliary.push((name.into(), loss));
    }

    /// Every layer the extractor must produce.
    pub fn layers(&self) -> &BTreeSet<String> {
        &self.layers
    }

    pub fn signature(&self) -> &StyleSignature<B> {
        &self.signature
    }

    pub fn compose(
        &self,
        activations: &LayerActivationMap<B>,
        generated: Tensor<B, 4>,
    ) -> Result<LossBreakdown<B>> {
        let device = generated.device();
        let zero = || Tensor::<B, 1>::zeros([1], &device);

        let content = content_loss(activations, &self.content_layers)?;
        let style = style_loss(activations, &self.style_layers, &self.signature)?;
        let tv = tv_loss(generated.clone());

        // disabled terms are still reported but never reach the total
        let weigh = |term: &Tensor<B, 1>, weight: f32| {
            if weight > 0.0 {
                term.clone() * weight
            } else {
                zero()
            }
        };
        let weighted_content = weigh(&content, self.content_weight);
        let weighted_style = weigh(&style, self.style_weight);
        let weighted_tv = weigh(&tv, self.tv_weight);

        let auxiliary = self
            .auxiliary
            .iter()
            .fold(zero(), |sum, (_, loss)| sum + loss(&generated));

        let total = weighted_style.clone()
            + weighted_content.clone()
            + weighted_tv.clone()
            + auxiliary.clone();

        Ok(LossBreakdown {
            content,
            style,
            tv,
            weighted_content,
            weighted_style,
            weighted_tv,
            auxiliary,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    fn random(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(shape, Distribution::Uniform(0.0, 2.0), &Default::default())
    }

    /// Joined activations whose generated half equals the original half.
    fn identical_activations(layers: &[&str]) -> LayerActivationMap<TestBackend> {
        let mut activations = LayerActivationMap::default();
        for layer in layers {
            let half = random([2, 4, 3, 3]);
            activations.insert(*layer, Tensor::cat(vec![half.clone(), half], 0));
        }
        activations
    }

    fn composer(
        config: &TrainingConfig,
        activations: &LayerActivationMap<TestBackend>,
    ) -> LossComposer<TestBackend> {
        let style = random([1, 4, 3, 3]);
        let mut style_activations = LayerActivationMap::default();
        for layer in &config.style_layers {
            if activations.contains(layer) {
                style_activations.insert(layer.as_str(), style.clone());
            }
        }
        let signature =
            StyleSignature::from_activations(&style_activations, &config.style_layers).unwrap();
        LossComposer::new(config, signature)
    }

    fn layers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_gram_matrix_values() {
        let device = Default::default();
        // two channels over two positions: [[1, 2], [3, 4]]
        let activation =
            Tensor::<TestBackend, 4>::from_data([[[[1.0, 2.0]], [[3.0, 4.0]]]], &device);

        let gram = gram_matrix(activation);
        assert_eq!(gram.dims(), [1, 2, 2]);
        assert_eq!(
            gram.into_data().to_vec::<f32>().unwrap(),
            vec![2.5, 5.5, 5.5, 12.5]
        );
    }

    #[test]
    fn test_content_loss_zero_for_identical_halves() {
        let activations = identical_activations(&["relu1_1", "relu1_2"]);
        let loss = content_loss(&activations, &layers(&["relu1_1", "relu1_2"])).unwrap();
        assert_eq!(loss.into_scalar(), 0.0);
    }

    #[test]
    fn test_content_loss_known_value() {
        let device = Default::default();
        let mut activations = LayerActivationMap::<TestBackend>::default();
        let generated = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device) * 3.0;
        let original = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        activations.insert("relu1_1", Tensor::cat(vec![generated.clone(), original.clone()], 0));
        activations.insert("relu2_1", Tensor::cat(vec![original, generated], 0));

        // 4 per layer, summed over two layers
        let loss = content_loss(&activations, &layers(&["relu1_1", "relu2_1"])).unwrap();
        assert_eq!(loss.into_scalar(), 8.0);
    }

    #[test]
    fn test_losses_non_negative() {
        let mut activations = LayerActivationMap::default();
        activations.insert("relu1_1", random([4, 4, 3, 3]));
        activations.insert("relu2_1", random([4, 4, 3, 3]));
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            content_layers: layers(&["relu1_1"]),
            style_layers: layers(&["relu1_1", "relu2_1"]),
            ..test_config(dir.path())
        };
        let composer = composer(&config, &activations);

        let content = content_loss(&activations, &config.content_layers).unwrap();
        let style = style_loss(&activations, &config.style_layers, composer.signature()).unwrap();
        assert!(content.into_scalar() >= 0.0);
        assert!(style.into_scalar() >= 0.0);
    }

    #[test]
    fn test_style_loss_zero_when_grams_match() {
        let half = random([1, 4, 3, 3]);
        let mut activations = LayerActivationMap::<TestBackend>::default();
        activations.insert("relu1_1", Tensor::cat(vec![half.clone(), random([1, 4, 3, 3])], 0));

        let mut style = LayerActivationMap::<TestBackend>::default();
        style.insert("relu1_1", half);
        let signature = StyleSignature::from_activations(&style, &layers(&["relu1_1"])).unwrap();

        let loss = style_loss(&activations, &layers(&["relu1_1"]), &signature).unwrap();
        assert_eq!(loss.into_scalar(), 0.0);
    }

    #[test]
    fn test_style_loss_missing_signature_layer() {
        let activations = identical_activations(&["relu1_1", "relu2_1"]);
        let signature =
            StyleSignature::from_activations(&activations, &layers(&["relu1_1"])).unwrap();

        let result = style_loss(&activations, &layers(&["relu1_1", "relu2_1"]), &signature);
        assert!(matches!(result, Err(TrainError::MissingLayer(layer)) if layer == "relu2_1"));
    }

    #[test]
    fn test_tv_loss_values() {
        let device = Default::default();
        let flat = Tensor::<TestBackend, 4>::ones([2, 4, 4, 3], &device) * 17.0;
        assert_eq!(tv_loss(flat).into_scalar(), 0.0);

        // one row [0, 1, 3]: horizontal diffs 1 and 2
        let row = Tensor::<TestBackend, 4>::from_data([[[[0.0], [1.0], [3.0]]]], &device);
        assert_eq!(tv_loss(row).into_scalar(), 2.5);

        let pixel = Tensor::<TestBackend, 4>::ones([1, 1, 1, 3], &device);
        assert_eq!(tv_loss(pixel).into_scalar(), 0.0);
    }

    #[test]
    fn test_total_is_linear_in_style_weight() {
        let mut activations = LayerActivationMap::default();
        activations.insert("relu1_1", random([4, 4, 3, 3]));
        activations.insert("relu1_2", random([4, 4, 3, 3]));
        activations.insert("relu2_1", random([4, 4, 3, 3]));
        let generated = random([2, 8, 8, 3]);
        let dir = tempfile::tempdir().unwrap();

        let base = TrainingConfig {
            tv_weight: 0.5,
            ..test_config(dir.path())
        };
        let single = composer(&base, &activations);
        let signature = single.signature().clone();
        let double = LossComposer::new(
            &TrainingConfig {
                style_weight: base.style_weight * 2.0,
                ..base.clone()
            },
            signature,
        );

        let single = single.compose(&activations, generated.clone()).unwrap().values();
        let double = double.compose(&activations, generated).unwrap().values();

        assert_eq!(double.weighted_style, 2.0 * single.weighted_style);
        assert_eq!(double.weighted_content, single.weighted_content);
        assert_eq!(double.weighted_tv, single.weighted_tv);
        let expected = single.total + single.weighted_style;
        assert!((double.total - expected).abs() <= 1e-4 * expected.abs().max(1.0));
    }

    #[test]
    fn test_identical_content_leaves_only_style() {
        let activations = identical_activations(&["relu1_1", "relu1_2", "relu2_1"]);
        let generated = random([2, 8, 8, 3]);
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert_eq!(config.content_layers.len(), 2);
        assert_eq!(config.tv_weight, 0.0);

        let losses = composer(&config, &activations)
            .compose(&activations, generated)
            .unwrap()
            .values();

        assert_eq!(losses.content, 0.0);
        assert!(losses.style > 0.0);
        assert_eq!(losses.total, config.style_weight * losses.style);
    }

    #[test]
    fn test_zero_weight_keeps_term_out_of_total() {
        let mut activations = LayerActivationMap::default();
        for layer in ["relu1_1", "relu1_2", "relu2_1"] {
            activations.insert(layer, random([2, 4, 3, 3]));
        }
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            style_weight: 0.0,
            content_weight: 0.0,
            tv_weight: 1.0,
            ..test_config(dir.path())
        };
        let signature = StyleSignature::from_activations(
            &identical_activations(&["relu1_1", "relu2_1"]),
            &config.style_layers,
        )
        .unwrap();
        let composer = LossComposer::new(&config, signature);

        let device = Default::default();
        let generated = Tensor::<TestBackend, 4>::from_data([[[[0.0], [1.0], [3.0]]]], &device);
        let losses = composer.compose(&activations, generated).unwrap().values();

        assert!(losses.content > 0.0);
        assert!(losses.style > 0.0);
        assert_eq!(losses.weighted_content, 0.0);
        assert_eq!(losses.weighted_style, 0.0);
        assert_eq!(losses.tv, 2.5);
        assert_eq!(losses.total, 2.5);
    }

    #[test]
    fn test_auxiliary_losses_are_added() {
        let activations = identical_activations(&["relu1_1", "relu1_2", "relu2_1"]);
        let generated = random([2, 8, 8, 3]);
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let mut composer = composer(&config, &activations);
        let before = composer
            .compose(&activations, generated.clone())
            .unwrap()
            .values();

        composer.register_auxiliary(
            "brightness",
            Box::new(|generated: &Tensor<TestBackend, 4>| generated.clone().mean() * 0.0 + 1.5),
        );
        let after = composer.compose(&activations, generated).unwrap().values();

        assert_eq!(after.auxiliary, 1.5);
        assert_eq!(after.total, before.total + 1.5);
    }
}
