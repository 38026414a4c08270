use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

use crate::evaluation::ConfusionMatrix;

#[derive(new)]
pub struct SegmentationMetricInput<B: Backend> {
    /// Per-class scores, `[batch_size, num_classes, height, width]`.
    outputs: Tensor<B, 4>,
    /// `[batch_size, height, width]`
    targets: Tensor<B, 3, Int>,
}

impl<B: Backend> SegmentationMetricInput<B> {
    fn confusion_matrix(&self) -> (ConfusionMatrix, usize) {
        let [batch_size, num_classes, height, width] = self.outputs.dims();
        let num_pixels = batch_size * height * width;

        let predictions = self.outputs.clone().argmax(1).reshape([num_pixels]);
        let predictions = to_host(predictions);
        let targets = to_host(self.targets.clone().reshape([num_pixels]));

        (
            ConfusionMatrix::from_predictions(&predictions, &targets, num_classes),
            batch_size,
        )
    }
}

pub(crate) fn to_host<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<i64> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .expect("Int tensor data converts to i64")
}

/// Mean intersection over union of the batch, in percent.
#[derive(Default)]
pub struct IoUMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> IoUMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for IoUMetric<B> {
    type Input = SegmentationMetricInput<B>;
    const NAME: &'static str = "IoU";

    fn update(
        &mut self,
        input: &SegmentationMetricInput<B>,
        _metadata: &MetricMetadata,
    ) -> MetricEntry {
        let (matrix, batch_size) = input.confusion_matrix();

        self.state.update(
            100.0 * matrix.mean_iou(),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for IoUMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Fraction of labelled pixels classified correctly, in percent.
#[derive(Default)]
pub struct PixelAccuracyMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> PixelAccuracyMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for PixelAccuracyMetric<B> {
    type Input = SegmentationMetricInput<B>;
    const NAME: &'static str = "Pixel Accuracy";

    fn update(
        &mut self,
        input: &SegmentationMetricInput<B>,
        _metadata: &MetricMetadata,
    ) -> MetricEntry {
        let (matrix, batch_size) = input.confusion_matrix();

        self.state.update(
            100.0 * matrix.pixel_accuracy(),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for PixelAccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
