use burn::{
    prelude::*,
    tensor::activation::{log_softmax, softmax},
};

#[cfg(feature = "training")]
use crate::{
    dataset::SegmentationBatch,
    training::{SegmentationNllLossConfig, SegmentationOutput},
};
#[cfg(feature = "training")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

use super::blocks::UpsampleMode;
use super::decoder::{SegDecoder, SegDecoderConfig};
use super::encoder::{SegEncoder, SegEncoderConfig};

#[derive(Module, Debug)]
pub struct SegmentationModel<B: Backend> {
    encoder: SegEncoder<B>,
    decoder: SegDecoder<B>,
    num_classes: usize,
    ignore_index: i32,
}

#[derive(Config, Debug)]
pub struct SegmentationModelConfig {
    input_channels: usize,
    num_classes: usize,
    #[config(default = "64")]
    base_channels: usize,
    #[config(default = "2")]
    num_downsamples: usize,
    #[config(default = "2")]
    dilation: usize,
    /// `Bilinear` has no backward pass on the ndarray or wgpu backends, so it
    /// only suits inference.
    #[config(default = "UpsampleMode::Nearest")]
    upsample: UpsampleMode,
    /// Target value excluded from the training loss.
    #[config(default = "-1")]
    ignore_index: i32,
}

impl SegmentationModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationModel<B> {
        let encoder = SegEncoderConfig::new(self.input_channels)
            .with_base_channels(self.base_channels)
            .with_num_downsamples(self.num_downsamples)
            .with_dilation(self.dilation);

        SegmentationModel {
            decoder: SegDecoderConfig::new(self.num_classes, encoder.out_channels())
                .with_upsample(self.upsample.clone())
                .init(device),
            encoder: encoder.init(device),
            num_classes: self.num_classes,
            ignore_index: self.ignore_index,
        }
    }
}

impl<B: Backend> SegmentationModel<B> {
    /// Per-pixel class scores at input resolution.
    pub fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = images.dims();
        let features = self.encoder.forward(images);

        self.decoder.forward(features, [height, width])
    }

    /// Per-pixel log-probabilities, `[batch_size, num_classes, height, width]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        log_softmax(self.logits(images), 1)
    }

    pub fn predict_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        softmax(self.logits(images), 1)
    }

    /// Most likely class per pixel, `[batch_size, height, width]`.
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        let [batch_size, _, height, width] = images.dims();

        self.logits(images)
            .argmax(1)
            .reshape([batch_size, height, width])
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    #[cfg(feature = "training")]
    pub fn forward_segmentation(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        let targets = batch.targets;
        let output = self.forward(batch.images);

        let loss = SegmentationNllLossConfig::new()
            .with_ignore_index(Some(self.ignore_index))
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        SegmentationOutput::new(loss, output, targets)
    }
}

#[cfg(feature = "training")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>>
    for SegmentationModel<B>
{
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "training")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for SegmentationModel<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch)
    }
}
