use std::ops::Range;
use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{
        GradientsParams, Optimizer, SgdConfig, decay::WeightDecayConfig, momentum::MomentumConfig,
    },
    prelude::*,
    record::{CompactRecorder, FileRecorder, RecorderError},
    tensor::backend::AutodiffBackend,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;

use crate::dataset::{DataSplit, ProcessedDataSet, SegmentationBatcher, SegmentationItem};
use crate::evaluation::{ConfusionMatrix, pixel_accuracy};
use crate::model::{SegmentationModel, SegmentationModelConfig};

use super::loss::{SegmentationNllLoss, SegmentationNllLossConfig};
use super::metrics::to_host;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Unable to record model at `{path}`: {source}")]
    Recorder {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
}

/// Turns a model and the loss it just produced into the next model.
pub trait UpdateRule<B: AutodiffBackend> {
    fn update(&mut self, model: SegmentationModel<B>, loss: Tensor<B, 1>) -> SegmentationModel<B>;
}

/// Fixed-rule gradient descent through any Burn optimizer.
pub struct OptimizerRule<O> {
    optimizer: O,
    lr: f64,
}

impl<O> OptimizerRule<O> {
    pub fn new(optimizer: O, lr: f64) -> Self {
        Self { optimizer, lr }
    }
}

impl<B, O> UpdateRule<B> for OptimizerRule<O>
where
    B: AutodiffBackend,
    O: Optimizer<SegmentationModel<B>, B>,
{
    fn update(&mut self, model: SegmentationModel<B>, loss: Tensor<B, 1>) -> SegmentationModel<B> {
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        self.optimizer.step(self.lr, model, grads)
    }
}

/// SGD with heavy-ball momentum (no dampening) and L2 weight decay.
pub fn sgd_config(momentum: f64, weight_decay: f32) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.0),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay)))
}

pub fn sgd<B: AutodiffBackend>(
    lr: f64,
    momentum: f64,
    weight_decay: f32,
) -> OptimizerRule<impl Optimizer<SegmentationModel<B>, B>> {
    OptimizerRule::new(sgd_config(momentum, weight_decay).init(), lr)
}

#[derive(Config, Debug)]
pub struct SegmenterConfig {
    pub model: SegmentationModelConfig,
    #[config(default = 10)]
    pub epochs: usize,
    #[config(default = 10)]
    pub batch_size: usize,
    #[config(default = 0.88)]
    pub train_ratio: f64,
    #[config(default = 0.04)]
    pub valid_ratio: f64,
    /// Training samples scored for the per-epoch train accuracy.
    #[config(default = 100)]
    pub train_eval_samples: usize,
    #[config(default = false)]
    pub weighted_loss: bool,
    #[config(default = 24)]
    pub seed: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_loss: f64,
    pub valid_accuracy: f64,
    pub train_accuracy: f64,
}

#[derive(Clone, Debug)]
pub struct TestReport {
    pub test_accuracy: f64,
    pub dataset_accuracy: f64,
    pub mean_iou: f64,
    pub confusion: ConfusionMatrix,
}

/// Drives training and evaluation of a [SegmentationModel] on a processed dataset.
pub struct Segmenter<B: AutodiffBackend> {
    model: SegmentationModel<B>,
    config: SegmenterConfig,
    data: ProcessedDataSet,
    split: DataSplit,
    loss: SegmentationNllLoss<B>,
    ignore_index: i64,
    rng: StdRng,
    device: B::Device,
}

impl<B: AutodiffBackend> Segmenter<B> {
    pub fn new(
        config: SegmenterConfig,
        data: ProcessedDataSet,
        ignore_index: i32,
        device: &B::Device,
    ) -> Self {
        let split = data.split(config.train_ratio, config.valid_ratio);
        let weights = config.weighted_loss.then(|| data.class_weights());
        let loss = SegmentationNllLossConfig::new()
            .with_weights(weights)
            .with_ignore_index(Some(ignore_index))
            .init(device);

        tracing::info!(
            "Segmenter on {} samples ({} classes): train {:?}, valid {:?}, test {:?}",
            data.items().len(),
            data.num_classes(),
            split.train,
            split.valid,
            split.test
        );

        Self {
            model: config.model.init(device),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            data,
            split,
            loss,
            ignore_index: ignore_index as i64,
            device: device.clone(),
        }
    }

    pub fn model(&self) -> &SegmentationModel<B> {
        &self.model
    }

    pub fn into_model(self) -> SegmentationModel<B> {
        self.model
    }

    pub fn split(&self) -> &DataSplit {
        &self.split
    }

    /// Train for `config.epochs` epochs with `rule`, reshuffling the train split every epoch.
    pub fn train<R: UpdateRule<B>>(&mut self, rule: &mut R) -> Vec<EpochSummary> {
        let batcher = SegmentationBatcher::<B>::new(self.device.clone());
        let batch_size = self.config.batch_size.max(1);
        let mut summaries = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            let mut indices: Vec<usize> = self.split.train.clone().collect();
            indices.shuffle(&mut self.rng);

            let mut total_loss = 0.0;
            let mut num_batches = 0usize;
            for chunk in indices.chunks(batch_size) {
                let batch = batcher.batch(self.items(chunk.iter().copied()));
                let output = self.model.forward(batch.images);
                let loss = self.loss.forward(output, batch.targets);

                total_loss += loss.clone().into_scalar().elem::<f64>();
                num_batches += 1;

                let model = self.model.clone();
                self.model = rule.update(model, loss);
            }

            let train_eval_end = self
                .split
                .train
                .end
                .min(self.split.train.start + self.config.train_eval_samples);
            let summary = EpochSummary {
                epoch,
                mean_loss: total_loss / num_batches.max(1) as f64,
                valid_accuracy: self.pixel_accuracy(self.split.valid.clone()),
                train_accuracy: self.pixel_accuracy(self.split.train.start..train_eval_end),
            };
            tracing::info!(
                "average loss for epoch {}: {:.5} | val accuracy {:.4} | train accuracy {:.4}",
                summary.epoch,
                summary.mean_loss,
                summary.valid_accuracy,
                summary.train_accuracy
            );
            summaries.push(summary);
        }

        summaries
    }

    /// Predicted and ground-truth class maps for every sample in `range`.
    pub fn predict(&self, range: Range<usize>) -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
        let model = self.model.valid();
        let batcher = SegmentationBatcher::<B::InnerBackend>::new(self.device.clone());
        let indices: Vec<usize> = range.collect();

        let mut predictions = Vec::with_capacity(indices.len());
        let mut truths = Vec::with_capacity(indices.len());
        for chunk in indices.chunks(self.config.batch_size.max(1)) {
            let batch = batcher.batch(self.items(chunk.iter().copied()));
            let [batch_size, height, width] = batch.targets.dims();
            let pixels = height * width;

            let predicted = to_host(model.predict(batch.images).reshape([batch_size * pixels]));
            let targets = to_host(batch.targets.reshape([batch_size * pixels]));

            predictions.extend(predicted.chunks(pixels).map(<[i64]>::to_vec));
            truths.extend(targets.chunks(pixels).map(<[i64]>::to_vec));
        }

        (predictions, truths)
    }

    pub fn pixel_accuracy(&self, range: Range<usize>) -> f64 {
        if range.is_empty() {
            return 0.0;
        }
        let (predictions, truths) = self.predict(range);
        pixel_accuracy(&predictions, &truths, Some(self.ignore_index))
    }

    pub fn confusion_matrix(&self, range: Range<usize>) -> ConfusionMatrix {
        let (predictions, truths) = self.predict(range);
        let mut matrix = ConfusionMatrix::new(self.model.num_classes());
        for (prediction, truth) in predictions.iter().zip(&truths) {
            matrix.update(prediction, truth);
        }
        matrix
    }

    pub fn test(&self) -> TestReport {
        let confusion = self.confusion_matrix(self.split.test.clone());
        let report = TestReport {
            test_accuracy: self.pixel_accuracy(self.split.test.clone()),
            dataset_accuracy: self.pixel_accuracy(0..self.data.items().len()),
            mean_iou: confusion.mean_iou(),
            confusion,
        };

        tracing::info!("test accuracy {:.4}", report.test_accuracy);
        tracing::info!("accuracy for whole dataset {:.4}", report.dataset_accuracy);
        tracing::info!("test mean IoU {:.4}", report.mean_iou);
        report
    }

    pub fn save_model(&self, path: &Path) -> Result<(), CheckpointError> {
        self.model
            .clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|source| CheckpointError::Recorder {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!("Saved model to {}", path.display());
        Ok(())
    }

    /// Replace the model with the checkpoint at `path`; `Ok(false)` when there is none.
    pub fn load_model(&mut self, path: &Path) -> Result<bool, CheckpointError> {
        let file = checkpoint_file::<B>(path);
        if !file.exists() {
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
        tracing::info!("Loaded model from {}", file.display());
        Ok(true)
    }

    /// Swap in a model trained elsewhere, e.g. by the burn `Learner`.
    pub fn set_model(&mut self, model: SegmentationModel<B>) {
        self.model = model;
    }

    fn items(&self, indices: impl Iterator<Item = usize>) -> Vec<SegmentationItem> {
        indices.map(|i| self.data.items()[i].clone()).collect()
    }
}

/// The file [CompactRecorder] writes for a checkpoint saved at `path`.
pub fn checkpoint_file<B: Backend>(path: &Path) -> PathBuf {
    path.with_extension(<CompactRecorder as FileRecorder<B>>::file_extension())
}
