use std::ops::Range;
use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer, decay::WeightDecayConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};

use crate::dataset::{Episode, KShotSampler, ProcessedDataSet, SegmentationBatcher};
use crate::model::{SegmentationModel, SegmentationModelConfig};
use crate::training::{
    CheckpointError, SegmentationNllLoss, SegmentationNllLossConfig, checkpoint_file,
};

use super::cell::{MetaLearningModel, MetaLearningModelConfig};
use super::optimizer::LearnedOptimizer;
use super::params::ParamLayout;

#[derive(Config, Debug)]
pub struct MetaLearnerConfig {
    pub cell: MetaLearningModelConfig,
    /// Architecture of the networks trained inside each episode.
    pub learner: SegmentationModelConfig,
    /// Support samples per episode, one inner update each.
    #[config(default = 5)]
    pub k: usize,
    #[config(default = 5)]
    pub query_size: usize,
    #[config(default = 100)]
    pub episodes: usize,
    #[config(default = 0.01)]
    pub lr: f64,
    #[config(default = 1e-5)]
    pub weight_decay: f32,
    #[config(default = 1.0)]
    pub grad_clip_norm: f32,
    #[config(default = "-1")]
    pub ignore_index: i32,
    #[config(default = 24)]
    pub seed: u64,
}

/// Trains a [MetaLearningModel] to optimise freshly initialised segmentation networks.
pub struct MetaLearner<B: AutodiffBackend> {
    model: MetaLearningModel<B>,
    config: MetaLearnerConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> MetaLearner<B> {
    pub fn new(config: MetaLearnerConfig, device: &B::Device) -> Self {
        Self {
            model: config.cell.init(device),
            config,
            device: device.clone(),
        }
    }

    pub fn model(&self) -> &MetaLearningModel<B> {
        &self.model
    }

    /// Run `config.episodes` few-shot episodes drawn from `range`, returning each query loss.
    ///
    /// Each episode initialises a new learner, updates it once per support sample with the
    /// current cell, scores the result on the query samples and back-propagates that loss
    /// through every update into the cell.
    pub fn train(&mut self, data: &ProcessedDataSet, range: Range<usize>) -> Vec<f64> {
        let mut optim = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(self.config.weight_decay)))
            .with_grad_clipping(Some(GradientClippingConfig::Norm(
                self.config.grad_clip_norm,
            )))
            .init();
        let mut sampler = KShotSampler::new(
            range,
            self.config.k,
            self.config.query_size,
            self.config.seed,
        );
        let batcher = SegmentationBatcher::<B>::new(self.device.clone());
        let loss_fn = SegmentationNllLossConfig::new()
            .with_ignore_index(Some(self.config.ignore_index))
            .init(&self.device);

        let mut losses = Vec::with_capacity(self.config.episodes);
        for index in 0..self.config.episodes {
            let episode = sampler.episode();
            let loss = self.episode(data, &episode, &loss_fn, &batcher);
            let value = loss.clone().into_scalar().elem::<f64>();

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = optim.step(self.config.lr, self.model.clone(), grads);

            tracing::info!("meta episode {}: query loss {:.5}", index, value);
            losses.push(value);
        }

        losses
    }

    fn episode(
        &self,
        data: &ProcessedDataSet,
        episode: &Episode,
        loss_fn: &SegmentationNllLoss<B>,
        batcher: &SegmentationBatcher<B>,
    ) -> Tensor<B, 1> {
        let mut learner: SegmentationModel<B> = self.config.learner.init(&self.device);
        let layout = ParamLayout::from_module(&learner);
        let mut theta = layout.flatten(&learner).detach();
        let mut state = self.model.init_state(layout.num_params(), &self.device);

        for &index in &episode.support {
            let batch = batcher.batch(vec![data.items()[index].clone()]);

            // Inner gradients are taken at a detached copy of theta.
            learner = layout.assign_leaves::<B, _>(learner, theta.clone().inner());
            let loss = loss_fn.forward(learner.forward(batch.images), batch.targets);
            let grads = loss.backward();
            let grad = Tensor::from_inner(layout.gradients::<B, _>(&learner, &grads));
            let loss = Tensor::from_inner(loss.inner());

            (theta, state) = self.model.step(theta, grad, loss, state);
        }

        let learner = layout.assign(learner, theta);
        let query = episode
            .query
            .iter()
            .map(|&index| data.items()[index].clone())
            .collect();
        let batch = batcher.batch(query);

        loss_fn.forward(learner.forward(batch.images), batch.targets)
    }

    /// An update rule driven by the current cell, for use outside meta-training.
    pub fn optimizer(&self) -> LearnedOptimizer<B> {
        LearnedOptimizer::new(self.model.valid())
    }

    pub fn save_model(&self, path: &Path) -> Result<(), CheckpointError> {
        self.model
            .clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|source| CheckpointError::Recorder {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!("Saved meta-learner to {}", path.display());
        Ok(())
    }

    /// Replace the cell with the checkpoint at `path`; `Ok(false)` when there is none.
    pub fn load_model(&mut self, path: &Path) -> Result<bool, CheckpointError> {
        if !checkpoint_file::<B>(path).exists() {
            return Ok(false);
        }

        self.model = self
            .model
            .clone()
            .load_file(path, &CompactRecorder::new(), &self.device)
            .map_err(|source| CheckpointError::Recorder {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!("Loaded meta-learner from {}", path.display());
        Ok(true)
    }
}

impl MetaLearnerConfig {
    /// Learner architecture for a dataset: input channels and class count
    /// taken from the data, width from `base_channels`.
    pub fn learner_for(data: &ProcessedDataSet, base_channels: usize) -> SegmentationModelConfig {
        let [channels, _, _] = data.sample_shape();
        SegmentationModelConfig::new(channels, data.num_classes())
            .with_base_channels(base_channels)
    }
}
