use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        InstanceNorm, InstanceNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Convolution followed by instance norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> ConvBlock<B> {
    pub fn new(channels: [usize; 2], kernel: usize, stride: usize, device: &B::Device) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);
        let norm = InstanceNormConfig::new(channels[1]).init(device);

        Self {
            conv,
            norm,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.norm.forward(output);
        self.relu.forward(output)
    }
}

/// Doubles the spatial size with a sub-pixel convolution.
#[derive(Module, Debug)]
pub struct UpscaleBlock<B: Backend> {
    conv: Conv2d<B>,
    shuffle: PixelShuffler,
    norm: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> UpscaleBlock<B> {
    /// `channels` are the block's input and output channel counts.
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([channels[0], channels[1] * 4], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let shuffle = PixelShuffler::new();
        let norm = InstanceNormConfig::new(channels[1]).init(device);

        Self {
            conv,
            shuffle,
            norm,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = self.shuffle.forward(output);
        let output = self.norm.forward(output);
        self.relu.forward(output)
    }
}

#[derive(Module, Debug, Clone, Default)]
pub struct PixelShuffler {}
impl PixelShuffler {
    pub fn new() -> Self {
        Self {}
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch_size, channels, height, width] = input.dims();

        let output_channels = channels / (2 * 2);

        // [B, C*4, H, W] -> [B, C, 2, 2, H, W]
        let reshaped = input.reshape([batch_size, output_channels, 2, 2, height, width]);

        // -> [B, C, H, 2, W, 2]
        let permuted = reshaped.permute([0, 1, 4, 2, 5, 3]);

        permuted.reshape([batch_size, output_channels, height * 2, width * 2])
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: InstanceNorm<B>,
    conv2: Conv2d<B>,
    norm2: InstanceNorm<B>,
    relu: Relu,
}
impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let conv = || {
            Conv2dConfig::new([channels, channels], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };

        Self {
            conv1: conv(),
            norm1: InstanceNormConfig::new(channels).init(device),
            conv2: conv(),
            norm2: InstanceNormConfig::new(channels).init(device),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv1.forward(input.clone());
        let output = self.norm1.forward(output);
        let output = self.relu.forward(output);
        let output = self.conv2.forward(output);
        let output = self.norm2.forward(output);

        input.add(output)
    }
}
