//! Small collaborators for exercising the trainer without pretrained weights.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
    },
    prelude::*,
    tensor::activation::relu,
};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    data::{BatchSource, RawBatch},
    error::{Result, TrainError},
    model::{FeatureExtractor, LayerActivationMap},
};

/// Two-block stand-in for VGG exposing `relu1_1`, `relu1_2` and `relu2_1`.
pub struct TinyExtractor<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: AvgPool2d,
    calls: Arc<AtomicUsize>,
    poison_call: Option<usize>,
}

impl<B: Backend> TinyExtractor<B> {
    pub const CHANNELS: usize = 4;

    pub fn new(device: &B::Device) -> Self {
        let conv = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [1, 1])
                .init(device)
                .no_grad()
        };

        Self {
            conv1: conv([3, Self::CHANNELS]),
            conv2: conv([Self::CHANNELS, Self::CHANNELS]),
            conv3: conv([Self::CHANNELS, Self::CHANNELS]),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            calls: Arc::new(AtomicUsize::new(0)),
            poison_call: None,
        }
    }

    /// Return NaN activations on the `call`-th invocation (1-based).
    pub fn poisoned_at(mut self, call: usize) -> Self {
        self.poison_call = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl<B: Backend> FeatureExtractor<B> for TinyExtractor<B> {
    fn extract(
        &self,
        images: Tensor<B, 4>,
        layers: &BTreeSet<String>,
    ) -> Result<LayerActivationMap<B>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let poisoned = self.poison_call == Some(call);

        // keeps activations of 0-255 inputs in a tame range
        let input = images.permute([0, 3, 1, 2]) / 64.0;
        let relu1_1 = relu(self.conv1.forward(input));
        let relu1_2 = relu(self.conv2.forward(relu1_1.clone()));
        let relu2_1 = relu(self.conv3.forward(self.pool.forward(relu1_2.clone())));

        let mut activations = LayerActivationMap::default();
        for (name, activation) in [
            ("relu1_1", relu1_1),
            ("relu1_2", relu1_2),
            ("relu2_1", relu2_1),
        ] {
            if layers.contains(name) {
                let activation = if poisoned {
                    activation + f32::NAN
                } else {
                    activation
                };
                activations.insert(name, activation);
            }
        }
        if let Some(missing) = layers.iter().find(|layer| !activations.contains(layer)) {
            return Err(TrainError::MissingLayer(missing.clone()));
        }

        Ok(activations)
    }
}

/// Source repeating one batch, recording start and shutdown.
pub struct StaticSource {
    batch: RawBatch,
    pub started: Arc<AtomicBool>,
    pub stopped: Arc<AtomicBool>,
}

impl StaticSource {
    pub fn new(batch_size: usize, size: usize) -> Self {
        let pixels = (0..batch_size * size * size * 3)
            .map(|i| ((i * 37) % 256) as u8)
            .collect();

        Self {
            batch: RawBatch::new(pixels, [batch_size, size, size, 3]),
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn batch(&self) -> &RawBatch {
        &self.batch
    }
}

impl BatchSource for StaticSource {
    fn start(&mut self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn next_batch(&mut self) -> Result<RawBatch> {
        if !self.started.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return Err(TrainError::SourceClosed);
        }
        Ok(self.batch.clone())
    }

    fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
