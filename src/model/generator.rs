use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
};

use crate::model::{
    layers::{ConvBlock, ResidualBlock, UpscaleBlock},
    StyleGenerator,
};

/// Feed-forward image transformation network: two strided downsampling
/// blocks, a residual trunk and two sub-pixel upscaling blocks.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    in_layer: ConvBlock<B>,
    down_layer_1: ConvBlock<B>,
    down_layer_2: ConvBlock<B>,
    res_layers: Vec<ResidualBlock<B>>,
    up_layer_1: UpscaleBlock<B>,
    up_layer_2: UpscaleBlock<B>,
    out_layer: Conv2d<B>,
}
impl<B: Backend> Generator<B> {
    /// Channels-first forward pass returning values in (-1, 1).
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.in_layer.forward(input);
        let output = self.down_layer_1.forward(output);
        let output = self.down_layer_2.forward(output);

        let output = self
            .res_layers
            .iter()
            .fold(output, |output, layer| layer.forward(output));

        let output = self.up_layer_1.forward(output);
        let output = self.up_layer_2.forward(output);
        let output = self.out_layer.forward(output);

        burn::tensor::activation::tanh(output)
    }
}

impl<B: Backend> StyleGenerator<B> for Generator<B> {
    fn infer(&self, content: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.forward(content.permute([0, 3, 1, 2]));
        let output = (output + 1.0) * 127.5;
        output.permute([0, 2, 3, 1])
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 32)]
    pub base_width: usize,
    #[config(default = 5)]
    pub residual_blocks: usize,
}
impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let width = self.base_width;

        let in_layer = ConvBlock::new([self.channels, width], 9, 1, device);
        let down_layer_1 = ConvBlock::new([width, width * 2], 3, 2, device);
        let down_layer_2 = ConvBlock::new([width * 2, width * 4], 3, 2, device);

        let res_layers = (0..self.residual_blocks)
            .map(|_| ResidualBlock::new(width * 4, device))
            .collect();

        let up_layer_1 = UpscaleBlock::new([width * 4, width * 2], device);
        let up_layer_2 = UpscaleBlock::new([width * 2, width], device);

        let out_layer = Conv2dConfig::new([width, self.channels], [9, 9])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Generator {
            in_layer,
            down_layer_1,
            down_layer_2,
            res_layers,
            up_layer_1,
            up_layer_2,
            out_layer,
        }
    }
}
