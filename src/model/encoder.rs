use burn::prelude::*;

use super::blocks::{ConvBnRelu, ConvBnReluConfig};

/// Convolutional feature extractor: a stem, strided stages that double the
/// channel count, and dilated context blocks that keep the output stride.
#[derive(Module, Debug)]
pub struct SegEncoder<B: Backend> {
    stem: ConvBnRelu<B>,
    stages: Vec<ConvBnRelu<B>>,
    context: Vec<ConvBnRelu<B>>,
}

#[derive(Config, Debug)]
pub struct SegEncoderConfig {
    input_channels: usize,
    #[config(default = "64")]
    base_channels: usize,
    #[config(default = "2")]
    num_downsamples: usize,
    #[config(default = "2")]
    dilation: usize,
}

impl SegEncoderConfig {
    pub fn out_channels(&self) -> usize {
        self.base_channels << self.num_downsamples
    }

    /// Spatial reduction between input and output features.
    pub fn output_stride(&self) -> usize {
        1 << self.num_downsamples
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> SegEncoder<B> {
        let stages = (0..self.num_downsamples)
            .map(|level| {
                let channels = self.base_channels << level;
                ConvBnReluConfig::new(channels, channels * 2)
                    .with_stride(2)
                    .init(device)
            })
            .collect();

        let out_channels = self.out_channels();
        let context = [self.dilation, self.dilation * 2]
            .into_iter()
            .map(|dilation| {
                ConvBnReluConfig::new(out_channels, out_channels)
                    .with_dilation(dilation)
                    .init(device)
            })
            .collect();

        SegEncoder {
            stem: ConvBnReluConfig::new(self.input_channels, self.base_channels).init(device),
            stages,
            context,
        }
    }
}

impl<B: Backend> SegEncoder<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(images);

        for stage in &self.stages {
            x = stage.forward(x);
        }
        for block in &self.context {
            x = block.forward(x);
        }

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_matches_reported_channels_and_stride() {
        let device = Default::default();
        let config = SegEncoderConfig::new(3).with_base_channels(4);
        let encoder = config.init::<TestBackend>(&device);

        let features = encoder.forward(Tensor::zeros([2, 3, 16, 24], &device));

        assert_eq!(config.out_channels(), 16);
        assert_eq!(config.output_stride(), 4);
        assert_eq!(features.dims(), [2, 16, 4, 6]);
    }
}
