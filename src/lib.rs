pub mod config;
pub mod evaluation;
pub mod model;

#[cfg(feature = "dataset")]
pub mod dataset;

#[cfg(feature = "training")]
pub mod training;

#[cfg(feature = "meta")]
pub mod meta;

pub use config::{DataSetName, ExperimentConfig, ExperimentPaths};
pub use model::{SegmentationModel, SegmentationModelConfig};

#[cfg(feature = "dataset")]
pub use dataset::{BsrSource, DataError, ProcessedDataSet, SegmentationSource, VocSource};

#[cfg(feature = "training")]
pub use training::{
    IoUMetric, OptimizerRule, PixelAccuracyMetric, SegmentationNllLoss, SegmentationOutput,
    Segmenter, SegmenterConfig, UpdateRule,
};

#[cfg(feature = "meta")]
pub use meta::{LearnedOptimizer, MetaLearner, MetaLearnerConfig, MetaLearningModel};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
