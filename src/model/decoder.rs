use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
};

use super::blocks::{
    ChannelDropout, ConvBnRelu, ConvBnReluConfig, PyramidPoolingBranch,
    PyramidPoolingBranchConfig, UpsampleMode,
};

/// Pyramid-pooling classification head.
///
/// Each branch pools the encoded features to a fixed grid, projects them and
/// resizes them back; the branches are concatenated with the features and
/// reduced to one score per class and pixel.
#[derive(Module, Debug)]
pub struct SegDecoder<B: Backend> {
    pyramid: Vec<PyramidPoolingBranch<B>>,
    fuse: ConvBnRelu<B>,
    dropout: ChannelDropout,
    classifier: Conv2d<B>,
    bilinear: bool,
}

#[derive(Config, Debug)]
pub struct SegDecoderConfig {
    num_classes: usize,
    encoded_channels: usize,
    #[config(default = "vec![1, 2, 3, 6]")]
    pool_scales: Vec<usize>,
    #[config(default = "64")]
    pyramid_channels: usize,
    #[config(default = "64")]
    fuse_channels: usize,
    /// Probability of zeroing a whole fused feature map.
    #[config(default = "0.1")]
    dropout: f64,
    /// `Bilinear` has no backward pass on the ndarray or wgpu backends, so it
    /// only suits inference.
    #[config(default = "UpsampleMode::Nearest")]
    upsample: UpsampleMode,
}

impl SegDecoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegDecoder<B> {
        let pyramid = self
            .pool_scales
            .iter()
            .map(|&scale| {
                PyramidPoolingBranchConfig::new(
                    self.encoded_channels,
                    self.pyramid_channels,
                    scale,
                )
                .init(device)
            })
            .collect();

        let fused_input =
            self.encoded_channels + self.pool_scales.len() * self.pyramid_channels;

        SegDecoder {
            pyramid,
            fuse: ConvBnReluConfig::new(fused_input, self.fuse_channels).init(device),
            dropout: ChannelDropout::new(self.dropout),
            classifier: Conv2dConfig::new([self.fuse_channels, self.num_classes], [1, 1])
                .init(device),
            bilinear: self.upsample == UpsampleMode::Bilinear,
        }
    }
}

impl<B: Backend> SegDecoder<B> {
    /// Class scores (logits) resized to `seg_size`.
    ///
    /// # Shapes
    ///
    /// - features: `[batch_size, encoded_channels, h, w]`
    /// - output: `[batch_size, num_classes, seg_size[0], seg_size[1]]`
    pub fn forward(&self, features: Tensor<B, 4>, seg_size: [usize; 2]) -> Tensor<B, 4> {
        let [_, _, height, width] = features.dims();
        let upsample = self.upsample_mode();

        let mut levels = Vec::with_capacity(self.pyramid.len() + 1);
        for branch in &self.pyramid {
            let pooled = branch.forward(features.clone());
            levels.push(upsample.resize(pooled, [height, width]));
        }
        levels.insert(0, features);

        let x = Tensor::cat(levels, 1);
        let x = self.fuse.forward(x);
        let x = self.dropout.forward(x);
        let x = self.classifier.forward(x);

        upsample.resize(x, seg_size)
    }

    fn upsample_mode(&self) -> UpsampleMode {
        if self.bilinear {
            UpsampleMode::Bilinear
        } else {
            UpsampleMode::Nearest
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn scores_every_class_at_requested_size() {
        let device = Default::default();
        let decoder = SegDecoderConfig::new(5, 8)
            .with_pyramid_channels(4)
            .with_fuse_channels(4)
            .with_upsample(UpsampleMode::Nearest)
            .init::<TestBackend>(&device);

        let scores = decoder.forward(Tensor::ones([2, 8, 6, 6], &device), [12, 12]);

        assert_eq!(scores.dims(), [2, 5, 12, 12]);
    }
}
