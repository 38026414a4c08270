use burn::{
    nn::{
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    },
    prelude::*,
    tensor::{
        Distribution,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

/// 3x3 convolution without bias, followed by batch-norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvBnReluConfig {
    input_channels: usize,
    num_filters: usize,
    #[config(default = "1")]
    stride: usize,
    #[config(default = "1")]
    dilation: usize,
}

impl ConvBnReluConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBnRelu<B> {
        ConvBnRelu {
            conv: Conv2dConfig::new([self.input_channels, self.num_filters], [3, 3])
                .with_stride([self.stride, self.stride])
                .with_dilation([self.dilation, self.dilation])
                .with_padding(PaddingConfig2d::Explicit(self.dilation, self.dilation))
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.num_filters).init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Config, Debug, PartialEq, Eq)]
pub enum UpsampleMode {
    Nearest,
    Bilinear,
}

impl UpsampleMode {
    pub fn resize<B: Backend>(&self, x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        if [height, width] == size {
            return x;
        }

        let mode = match self {
            UpsampleMode::Nearest => InterpolateMode::Nearest,
            UpsampleMode::Bilinear => InterpolateMode::Bilinear,
        };
        interpolate(x, size, InterpolateOptions::new(mode))
    }
}

/// Zeroes entire channels with probability `prob` and rescales the rest.
///
/// Only active on autodiff backends, like [Dropout](burn::nn::Dropout).
#[derive(Module, Clone, Debug)]
pub struct ChannelDropout {
    prob: f64,
}

impl ChannelDropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.prob <= 0.0 {
            return x;
        }
        if self.prob >= 1.0 {
            return x.zeros_like();
        }

        let [batch_size, channels, _, _] = x.dims();
        let keep = 1.0 - self.prob;
        let mask = Tensor::<B, 4>::random(
            [batch_size, channels, 1, 1],
            Distribution::Bernoulli(keep),
            &x.device(),
        );

        x * mask.div_scalar(keep)
    }
}

/// One level of the pyramid: pool to `scale x scale`, project, normalise.
#[derive(Module, Debug)]
pub struct PyramidPoolingBranch<B: Backend> {
    pool: AdaptiveAvgPool2d,
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> PyramidPoolingBranch<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pool.forward(x);
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);

        self.activation.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct PyramidPoolingBranchConfig {
    input_channels: usize,
    num_filters: usize,
    scale: usize,
}

impl PyramidPoolingBranchConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PyramidPoolingBranch<B> {
        PyramidPoolingBranch {
            pool: AdaptiveAvgPool2dConfig::new([self.scale, self.scale]).init(),
            conv: Conv2dConfig::new([self.input_channels, self.num_filters], [1, 1])
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(self.num_filters).init(device),
            activation: Relu::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn strided_block_halves_resolution() {
        let device = Default::default();
        let block = ConvBnReluConfig::new(3, 8)
            .with_stride(2)
            .init::<TestBackend>(&device);

        let output = block.forward(Tensor::ones([1, 3, 8, 8], &device));

        assert_eq!(output.dims(), [1, 8, 4, 4]);
    }

    #[test]
    fn dilated_block_keeps_resolution() {
        let device = Default::default();
        let block = ConvBnReluConfig::new(4, 4)
            .with_dilation(4)
            .init::<TestBackend>(&device);

        let output = block.forward(Tensor::ones([2, 4, 6, 6], &device));

        assert_eq!(output.dims(), [2, 4, 6, 6]);
        assert!(output.min().into_scalar() >= 0.0);
    }

    #[test]
    fn pyramid_branch_pools_to_scale() {
        let device = Default::default();
        let branch = PyramidPoolingBranchConfig::new(4, 2, 3).init::<TestBackend>(&device);

        let output = branch.forward(Tensor::ones([1, 4, 9, 9], &device));

        assert_eq!(output.dims(), [1, 2, 3, 3]);
    }

    #[test]
    fn channel_dropout_drops_whole_maps() {
        type TrainBackend = burn::backend::Autodiff<TestBackend>;
        let device = Default::default();
        let dropout = ChannelDropout::new(0.5);

        let output = dropout.forward(Tensor::<TrainBackend, 4>::ones([4, 8, 3, 3], &device));

        let values = output.into_data().to_vec::<f32>().unwrap();
        for plane in values.chunks(9) {
            assert!(plane.iter().all(|&v| v == plane[0]));
            assert!(plane[0] == 0.0 || plane[0] == 2.0);
        }
    }

    #[test]
    fn channel_dropout_is_identity_without_autodiff() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 3, 3], &device);

        let output = ChannelDropout::new(0.5).forward(x.clone());

        output.into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn resize_restores_requested_size() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 2, 3, 3], &device);

        let output = UpsampleMode::Nearest.resize(x, [6, 6]);

        assert_eq!(output.dims(), [1, 2, 6, 6]);
    }
}
