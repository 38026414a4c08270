pub mod learner;
pub mod loss;
pub mod metrics;
pub mod segmenter;

pub use learner::SegmentationOutput;
pub use loss::{SegmentationNllLoss, SegmentationNllLossConfig};
pub use metrics::{IoUMetric, PixelAccuracyMetric, SegmentationMetricInput};
pub use segmenter::{
    CheckpointError, EpochSummary, OptimizerRule, Segmenter, SegmenterConfig, TestReport,
    UpdateRule, checkpoint_file, sgd, sgd_config,
};
