// Layer layout matches the record produced by burn-import from "models/vgg19.onnx",
// minus the classifier head.
use burn::nn::conv::Conv2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::MaxPool2d;
use burn::nn::pool::MaxPool2dConfig;
use burn::nn::PaddingConfig2d;
use burn::record::FullPrecisionSettings;
use burn::record::NamedMpkFileRecorder;
use burn::record::Recorder;
use burn::{
    module::Module,
    tensor::{activation::relu, backend::Backend, Tensor},
};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::{
    error::{Result, TrainError},
    model::{FeatureExtractor, LayerActivationMap},
};

/// Names of every activation [`Vgg19`] can expose, in forward order.
pub const VGG19_LAYERS: [&str; 20] = [
    "relu1_1", "relu1_2", "pool1", //
    "relu2_1", "relu2_2", "pool2", //
    "relu3_1", "relu3_2", "relu3_3", "relu3_4", "pool3", //
    "relu4_1", "relu4_2", "relu4_3", "relu4_4", "pool4", //
    "relu5_1", "relu5_2", "relu5_3", "relu5_4",
];

/// Convolutions per block.
const BLOCKS: [usize; 5] = [2, 2, 4, 4, 4];

#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    conv2d1: Conv2d<B>,
    conv2d2: Conv2d<B>,
    maxpool2d1: MaxPool2d,
    conv2d3: Conv2d<B>,
    conv2d4: Conv2d<B>,
    maxpool2d2: MaxPool2d,
    conv2d5: Conv2d<B>,
    conv2d6: Conv2d<B>,
    conv2d7: Conv2d<B>,
    conv2d8: Conv2d<B>,
    maxpool2d3: MaxPool2d,
    conv2d9: Conv2d<B>,
    conv2d10: Conv2d<B>,
    conv2d11: Conv2d<B>,
    conv2d12: Conv2d<B>,
    maxpool2d4: MaxPool2d,
    conv2d13: Conv2d<B>,
    conv2d14: Conv2d<B>,
    conv2d15: Conv2d<B>,
    conv2d16: Conv2d<B>,
}

impl<B: Backend> Vgg19<B> {
    /// Load pretrained weights; the returned network has gradients disabled.
    pub fn from_file<P: AsRef<Path>>(file: P, device: &B::Device) -> Result<Self> {
        let file = file.as_ref();
        info!("loading VGG19 weights from {:?}", file);

        let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
            .load(file.to_path_buf(), device)
            .map_err(TrainError::Recorder)?;

        Ok(Self::new(device).load_record(record).no_grad())
    }

    /// Randomly initialised, frozen network.
    pub fn new(device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_stride([1, 1])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(true)
                .init(device)
        };
        let pool = || {
            MaxPool2dConfig::new([2, 2])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Valid)
                .init()
        };

        Self {
            conv2d1: conv([3, 64]),
            conv2d2: conv([64, 64]),
            maxpool2d1: pool(),
            conv2d3: conv([64, 128]),
            conv2d4: conv([128, 128]),
            maxpool2d2: pool(),
            conv2d5: conv([128, 256]),
            conv2d6: conv([256, 256]),
            conv2d7: conv([256, 256]),
            conv2d8: conv([256, 256]),
            maxpool2d3: pool(),
            conv2d9: conv([256, 512]),
            conv2d10: conv([512, 512]),
            conv2d11: conv([512, 512]),
            conv2d12: conv([512, 512]),
            maxpool2d4: pool(),
            conv2d13: conv([512, 512]),
            conv2d14: conv([512, 512]),
            conv2d15: conv([512, 512]),
            conv2d16: conv([512, 512]),
        }
        .no_grad()
    }

    fn convs(&self) -> [&Conv2d<B>; 16] {
        [
            &self.conv2d1,
            &self.conv2d2,
            &self.conv2d3,
            &self.conv2d4,
            &self.conv2d5,
            &self.conv2d6,
            &self.conv2d7,
            &self.conv2d8,
            &self.conv2d9,
            &self.conv2d10,
            &self.conv2d11,
            &self.conv2d12,
            &self.conv2d13,
            &self.conv2d14,
            &self.conv2d15,
            &self.conv2d16,
        ]
    }

    fn pools(&self) -> [&MaxPool2d; 4] {
        [
            &self.maxpool2d1,
            &self.maxpool2d2,
            &self.maxpool2d3,
            &self.maxpool2d4,
        ]
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg19<B> {
    /// Stops at the deepest requested layer.
    fn extract(
        &self,
        images: Tensor<B, 4>,
        layers: &BTreeSet<String>,
    ) -> Result<LayerActivationMap<B>> {
        if let Some(unknown) = layers
            .iter()
            .find(|layer| !VGG19_LAYERS.contains(&layer.as_str()))
        {
            return Err(TrainError::MissingLayer(unknown.clone()));
        }

        let mut activations = LayerActivationMap::default();
        if layers.is_empty() {
            return Ok(activations);
        }

        let convs = self.convs();
        let pools = self.pools();
        let mut convs = convs.iter();
        let mut output = images.permute([0, 3, 1, 2]);

        for (block, &depth) in BLOCKS.iter().enumerate() {
            for index in 0..depth {
                let Some(conv) = convs.next() else {
                    break;
                };
                output = relu(conv.forward(output));

                let name = format!("relu{}_{}", block + 1, index + 1);
                if layers.contains(&name) {
                    activations.insert(name, output.clone());
                    if activations.len() == layers.len() {
                        return Ok(activations);
                    }
                }
            }

            if let Some(pool) = pools.get(block) {
                output = pool.forward(output);

                let name = format!("pool{}", block + 1);
                if layers.contains(&name) {
                    activations.insert(name, output.clone());
                    if activations.len() == layers.len() {
                        return Ok(activations);
                    }
                }
            }
        }

        Ok(activations)
    }
}
