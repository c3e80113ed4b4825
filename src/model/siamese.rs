//! Twin convolutional network over before/after image pairs.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::{Head, ModelType};
use crate::model::INPUT_CHANNELS;

/// Configuration for the SiameseNetwork
#[derive(Config, Debug)]
pub struct SiameseNetworkConfig {
    /// Width of the output layer: 1 for regression, class count otherwise
    pub output_width: usize,

    /// Output channels of each convolutional block in a branch
    pub filters: Vec<usize>,

    /// Units of the hidden fully connected layer
    #[config(default = "512")]
    pub hidden_units: usize,

    /// Dropout rate before the hidden layer
    #[config(default = "0.25")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl SiameseNetworkConfig {
    /// Four blocks of 32 to 256 filters
    pub fn heavy(output_width: usize) -> Self {
        Self::new(output_width, vec![32, 64, 128, 256])
    }

    /// Two small blocks for quick experiments
    pub fn light(output_width: usize) -> Self {
        Self::new(output_width, vec![16, 32])
            .with_hidden_units(64)
            .with_dropout_rate(0.1)
    }

    /// Network backing a model type, `None` for statistical models
    pub fn for_model(model_type: ModelType, head: Head) -> Option<Self> {
        let width = head.output_width();
        match model_type {
            ModelType::Heavy | ModelType::Probability => Some(Self::heavy(width)),
            ModelType::Light => Some(Self::light(width)),
            ModelType::Random | ModelType::Average => None,
        }
        .map(|config| config.with_in_channels(INPUT_CHANNELS))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SiameseNetwork<B> {
        SiameseNetwork::new(self, device)
    }
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Feature extractor for one side of the pair
#[derive(Module, Debug)]
pub struct Branch<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Branch<B> {
    fn new(in_channels: usize, filters: &[usize], device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(filters.len());
        let mut channels = in_channels;
        for &out in filters {
            blocks.push(ConvBlock::new(channels, out, device));
            channels = out;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// [B, C, H, W] -> [B, features]
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

/// Quasi-siamese network: same topology on both sides, separate weights
///
/// Architecture:
/// - before and after branches of conv blocks with global average pooling
/// - concatenated branch features
/// - dropout, hidden linear layer with ReLU, output layer
#[derive(Module, Debug)]
pub struct SiameseNetwork<B: Backend> {
    before: Branch<B>,
    after: Branch<B>,
    dropout: Dropout,
    fc1: Linear<B>,
    relu: Relu,
    fc2: Linear<B>,
    output_width: usize,
}

impl<B: Backend> SiameseNetwork<B> {
    pub fn new(config: &SiameseNetworkConfig, device: &B::Device) -> Self {
        let features = config.filters.last().copied().unwrap_or(config.in_channels);

        Self {
            before: Branch::new(config.in_channels, &config.filters, device),
            after: Branch::new(config.in_channels, &config.filters, device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            fc1: LinearConfig::new(features * 2, config.hidden_units).init(device),
            relu: Relu::new(),
            fc2: LinearConfig::new(config.hidden_units, config.output_width).init(device),
            output_width: config.output_width,
        }
    }

    /// Raw outputs of shape [batch_size, output_width]
    pub fn forward(&self, image1: Tensor<B, 4>, image2: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = Tensor::cat(
            vec![self.before.forward(image1), self.after.forward(image2)],
            1,
        );
        let x = self.dropout.forward(features);
        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        self.fc2.forward(x)
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }
}
