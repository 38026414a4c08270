//! Per-pixel negative log-likelihood for segmentation.
//!
//! Follows the structure of Burn's `CrossEntropyLoss` but works on
//! `[batch_size, num_classes, height, width]` scores and `[batch_size, height, width]`
//! targets, with an ignore index for unlabelled pixels.

use burn::{
    module::{Content, DisplaySettings, ModuleDisplay},
    prelude::*,
    tensor::activation::log_softmax,
};

/// Configuration to create a [SegmentationNllLoss] using the
/// [init function](SegmentationNllLossConfig::init).
#[derive(Config, Debug)]
pub struct SegmentationNllLossConfig {
    /// Label smoothing factor in `[0, 1]`.
    ///
    /// The loss becomes `(1 - a) * nll + a * mean_c(-log p_c)`.
    pub smoothing: Option<f32>,

    /// Per-class weights, indexed by label.
    ///
    /// With weights the mean is taken over the summed weight of the valid
    /// pixels instead of their count.
    pub weights: Option<Vec<f32>>,

    /// Whether the inputs are raw scores (a log-softmax is applied) or
    /// already log-probabilities.
    #[config(default = false)]
    pub logits: bool,

    /// Target value whose pixels contribute neither loss nor gradient.
    pub ignore_index: Option<i32>,
}

impl SegmentationNllLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationNllLoss<B> {
        self.assertions();
        SegmentationNllLoss {
            weights: self
                .weights
                .as_ref()
                .map(|e| Tensor::<B, 1>::from_floats(e.as_slice(), device)),
            smoothing: self.smoothing,
            logits: self.logits,
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        if let Some(alpha) = self.smoothing {
            assert!(
                (0.0..=1.).contains(&alpha),
                "Alpha of the smoothed segmentation loss should be in interval [0, 1]. Got {}",
                alpha
            );
        };
        if let Some(weights) = self.weights.as_ref() {
            assert!(
                weights.iter().all(|e| e >= &0.),
                "Weights of the segmentation loss cannot be negative."
            );
        }
    }
}

/// Should be created using [SegmentationNllLossConfig].
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct SegmentationNllLoss<B: Backend> {
    pub weights: Option<Tensor<B, 1>>,
    pub smoothing: Option<f32>,
    pub logits: bool,
    pub ignore_index: Option<i32>,
}

impl<B: Backend> ModuleDisplay for SegmentationNllLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weights", &self.weights)
            .add("smoothing", &self.smoothing)
            .add("logits", &self.logits)
            .add("ignore_index", &self.ignore_index)
            .optional()
    }
}

impl<B: Backend> SegmentationNllLoss<B> {
    /// Compute the criterion on the input tensor.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, height, width]` (integer class indices)
    ///
    /// A batch without any valid pixel has a loss of zero.
    pub fn forward(&self, predictions: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        Self::assertions(&predictions, &targets);

        let [batch_size, num_classes, height, width] = predictions.dims();
        let num_pixels = batch_size * height * width;

        let log_probs = if self.logits {
            log_softmax(predictions, 1)
        } else {
            predictions
        };
        let log_probs = log_probs
            .permute([0, 2, 3, 1])
            .reshape([num_pixels, num_classes]);
        let targets = targets.reshape([num_pixels]);

        let valid = match self.ignore_index {
            Some(ignore_index) => targets.clone().not_equal_elem(ignore_index),
            None => targets.clone().ones_like().bool(),
        };
        let invalid = valid.bool_not();
        // Ignored pixels may carry an out-of-range index; point them at class 0 before gathering.
        let targets = targets.mask_fill(invalid.clone(), 0);

        let pixel_weights = match &self.weights {
            Some(weights) => weights.clone().gather(0, targets.clone()),
            None => Tensor::ones([num_pixels], &log_probs.device()),
        }
        .mask_fill(invalid, 0.0);

        let picked = log_probs
            .clone()
            .gather(1, targets.reshape([num_pixels, 1]))
            .reshape([num_pixels]);
        let denominator = pixel_weights.clone().sum().clamp_min(f32::EPSILON);

        let nll = (picked * pixel_weights.clone()).sum().neg() / denominator.clone();

        match self.smoothing {
            Some(alpha) if alpha > 0.0 => {
                let uniform = (log_probs.mean_dim(1).reshape([num_pixels]) * pixel_weights)
                    .sum()
                    .neg()
                    / denominator;
                nll * (1.0 - alpha) + uniform * alpha
            }
            _ => nll,
        }
    }

    fn assertions(predictions: &Tensor<B, 4>, targets: &Tensor<B, 3, Int>) {
        let [pred_batch, _pred_classes, pred_height, pred_width] = predictions.dims();
        let [target_batch, target_height, target_width] = targets.dims();

        assert_eq!(
            pred_batch, target_batch,
            "Batch size mismatch: predictions ({}) vs targets ({})",
            pred_batch, target_batch
        );

        assert_eq!(
            pred_height, target_height,
            "Height mismatch: predictions ({}) vs targets ({})",
            pred_height, target_height
        );

        assert_eq!(
            pred_width, target_width,
            "Width mismatch: predictions ({}) vs targets ({})",
            pred_width, target_width
        );
    }
}
