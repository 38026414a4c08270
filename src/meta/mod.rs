mod cell;
mod learner;
mod optimizer;
mod params;

pub use cell::{MetaLearningModel, MetaLearningModelConfig, MetaState};
pub use learner::{MetaLearner, MetaLearnerConfig};
pub use optimizer::LearnedOptimizer;
pub use params::ParamLayout;
